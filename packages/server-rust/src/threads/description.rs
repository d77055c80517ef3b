//! Schemas of the threads subsystem resources.

use keel_core::{AttributeDescription, ModelType, ResourceDescription};

use super::attr;
use super::{
    BOUNDED_QUEUE_THREAD_POOL, QUEUELESS_THREAD_POOL, SCHEDULED_THREAD_POOL, THREAD_FACTORY,
    UNBOUNDED_QUEUE_THREAD_POOL,
};

fn string(description: &str) -> AttributeDescription {
    AttributeDescription::new(ModelType::String, description)
}

fn decimal(description: &str) -> AttributeDescription {
    AttributeDescription::new(ModelType::BigDecimal, description)
}

fn boolean(description: &str) -> AttributeDescription {
    AttributeDescription::new(ModelType::Boolean, description)
}

fn name(what: &str) -> AttributeDescription {
    string(&format!("The name of the {what}")).required().min_length(1)
}

fn properties() -> AttributeDescription {
    AttributeDescription::new(ModelType::List, "Free-form properties, one name/value pair per entry")
        .value_type(ModelType::Object)
}

#[must_use]
pub fn subsystem() -> ResourceDescription {
    ResourceDescription::new("The threading subsystem")
        .child(THREAD_FACTORY, "Thread factories", 0)
        .child(UNBOUNDED_QUEUE_THREAD_POOL, "Thread pools with an unbounded queue", 0)
        .child(BOUNDED_QUEUE_THREAD_POOL, "Thread pools with a bounded queue", 0)
        .child(QUEUELESS_THREAD_POOL, "Thread pools without a queue", 0)
        .child(SCHEDULED_THREAD_POOL, "Thread pools for scheduled tasks", 0)
}

#[must_use]
pub fn thread_factory() -> ResourceDescription {
    ResourceDescription::new("Thread factory")
        .attribute(attr::NAME, name("thread factory"))
        .attribute(attr::GROUP_NAME, string("The name of the thread group for created threads"))
        .attribute(
            attr::THREAD_NAME_PATTERN,
            string("Template for thread names; %f is the factory name, %g the group and %t the thread number")
                .min_length(1),
        )
        .attribute(
            attr::PRIORITY,
            AttributeDescription::new(ModelType::Int, "Priority of created threads").range(1, 10),
        )
        .attribute(attr::PROPERTIES, properties())
}

/// Attributes every pool kind has.
fn pool(description: &str) -> ResourceDescription {
    ResourceDescription::new(description)
        .attribute(attr::NAME, name("thread pool"))
        .attribute(attr::THREAD_FACTORY, string("The thread factory that creates the pool's threads"))
        .attribute(attr::PROPERTIES, properties())
        .attribute(attr::MAX_THREADS_COUNT, decimal("Fixed part of the maximum thread count"))
        .attribute(attr::MAX_THREADS_PER_CPU, decimal("Per-cpu part of the maximum thread count"))
        .attribute(
            attr::KEEPALIVE_TIME_DURATION,
            AttributeDescription::new(ModelType::Long, "How long idle threads are kept"),
        )
        .attribute(attr::KEEPALIVE_TIME_UNIT, string("Time unit of the keepalive duration"))
}

#[must_use]
pub fn unbounded_queue_thread_pool() -> ResourceDescription {
    pool("Thread pool with an unbounded queue")
}

#[must_use]
pub fn bounded_queue_thread_pool() -> ResourceDescription {
    pool("Thread pool with a bounded queue")
        .attribute(attr::CORE_THREADS_COUNT, decimal("Fixed part of the core thread count"))
        .attribute(attr::CORE_THREADS_PER_CPU, decimal("Per-cpu part of the core thread count"))
        .attribute(attr::QUEUE_LENGTH_COUNT, decimal("Fixed part of the queue length"))
        .attribute(attr::QUEUE_LENGTH_PER_CPU, decimal("Per-cpu part of the queue length"))
        .attribute(attr::BLOCKING, boolean("Whether submitters block when the queue is full"))
        .attribute(attr::ALLOW_CORE_TIMEOUT, boolean("Whether core threads may time out"))
        .attribute(attr::HANDOFF_EXECUTOR, string("Executor that receives rejected tasks"))
}

#[must_use]
pub fn queueless_thread_pool() -> ResourceDescription {
    pool("Thread pool that hands tasks straight to threads")
        .attribute(attr::BLOCKING, boolean("Whether submitters block when all threads are busy"))
        .attribute(attr::HANDOFF_EXECUTOR, string("Executor that receives rejected tasks"))
}

#[must_use]
pub fn scheduled_thread_pool() -> ResourceDescription {
    pool("Thread pool for scheduled tasks")
}
