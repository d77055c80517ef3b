use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use super::controller::{Service, ServiceValue, StartContext};

/// Service whose value is a fixed object, available as soon as it starts.
#[derive(Debug)]
pub struct ValueService<T> {
    value: Arc<T>,
}

impl<T: Any + Send + Sync> ValueService<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    #[must_use]
    pub fn from_arc(value: Arc<T>) -> Self {
        Self { value }
    }
}

#[async_trait]
impl<T: Any + Send + Sync> Service for ValueService<T> {
    async fn start(&self, _ctx: &StartContext) -> anyhow::Result<ServiceValue> {
        Ok(self.value.clone())
    }
}
