//! Thread factories configured through the model and published as services.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use indexmap::IndexMap;
use keel_core::{ModelNode, ServiceName};
use tracing::info;

use super::attr;
use crate::service::{Service, ServiceValue, StartContext};

const DEFAULT_PRIORITY: i32 = 5;

/// Name of the service that publishes the thread factory `name`.
///
/// # Errors
///
/// Fails when `name` is not a valid service name segment.
pub fn service_name(name: &str) -> Result<ServiceName, keel_core::ModelError> {
    ServiceName::of(["jboss", "thread", "factory", name])
}

/// Creates named OS threads.
///
/// Priority is recorded for reporting; the platform scheduler does not
/// apply it.
#[derive(Debug)]
pub struct ThreadFactory {
    name: String,
    group_name: Option<String>,
    pattern: String,
    priority: i32,
    properties: IndexMap<String, String>,
    created: AtomicU64,
}

impl ThreadFactory {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_name: None,
            pattern: "%f-%t".to_string(),
            priority: DEFAULT_PRIORITY,
            properties: IndexMap::new(),
            created: AtomicU64::new(0),
        }
    }

    /// Builds a factory from a `thread-factory` resource.
    #[must_use]
    pub fn from_model(name: &str, resource: &ModelNode) -> Self {
        let mut factory = Self::new(name);
        factory.group_name = resource.get(attr::GROUP_NAME).as_str().map(str::to_string);
        if let Some(pattern) = resource.get(attr::THREAD_NAME_PATTERN).as_str() {
            factory.pattern = pattern.to_string();
        }
        factory.priority = resource.get(attr::PRIORITY).as_i32().unwrap_or(DEFAULT_PRIORITY);
        factory.properties = properties(resource.get(attr::PROPERTIES));
        factory
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn properties(&self) -> &IndexMap<String, String> {
        &self.properties
    }

    /// Checks that the name pattern only uses known placeholders.
    ///
    /// # Errors
    ///
    /// Names the first unknown placeholder.
    pub fn validate_pattern(&self) -> anyhow::Result<()> {
        let mut chars = self.pattern.chars();
        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.next() {
                    Some('f' | 'g' | 't' | '%') => {}
                    Some(other) => anyhow::bail!("unknown placeholder %{other} in thread name pattern"),
                    None => anyhow::bail!("thread name pattern ends with a bare %"),
                }
            }
        }
        Ok(())
    }

    /// Expands the name pattern for the `sequence`-th thread.
    #[must_use]
    pub fn thread_name(&self, sequence: u64) -> String {
        let mut out = String::with_capacity(self.pattern.len() + 8);
        let mut chars = self.pattern.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('f') => out.push_str(&self.name),
                Some('g') => out.push_str(self.group_name.as_deref().unwrap_or("main")),
                Some('t') => out.push_str(&sequence.to_string()),
                Some(other) => out.push(other),
                None => {}
            }
        }
        out
    }

    /// Spawns `f` on a new thread named from the pattern.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the thread cannot be created.
    pub fn spawn<F, T>(&self, f: F) -> std::io::Result<thread::JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sequence = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        thread::Builder::new().name(self.thread_name(sequence)).spawn(f)
    }

    /// Threads spawned so far.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

/// Reads `[{"propA" => "valueA"}, ..]`.
fn properties(node: &ModelNode) -> IndexMap<String, String> {
    node.as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(ModelNode::as_object)
        .flat_map(|entry| entry.iter())
        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
        .collect()
}

/// Publishes a [`ThreadFactory`] once its configuration checks out.
pub struct ThreadFactoryService {
    factory: Arc<ThreadFactory>,
}

impl ThreadFactoryService {
    #[must_use]
    pub fn new(factory: ThreadFactory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }
}

#[async_trait]
impl Service for ThreadFactoryService {
    async fn start(&self, ctx: &StartContext) -> anyhow::Result<ServiceValue> {
        self.factory.validate_pattern()?;
        info!(service = %ctx.name(), factory = %self.factory.name, "thread factory available");
        Ok(self.factory.clone())
    }
}
