//! Configuration persistence hook.
//!
//! The [`ModelController`](super::ModelController) hands a snapshot of the
//! whole model to its [`ConfigurationPersister`] after every successful
//! top-level mutation. How (or whether) the snapshot is stored is up to the
//! implementation; a failing store is logged and does not undo the mutation.

use async_trait::async_trait;
use keel_core::ModelNode;
use parking_lot::Mutex;

/// Stores configuration snapshots.
///
/// Used as `Arc<dyn ConfigurationPersister>`.
#[async_trait]
pub trait ConfigurationPersister: Send + Sync {
    /// Persist `model`, the complete configuration after a mutation.
    async fn store(&self, model: &ModelNode) -> anyhow::Result<()>;

    /// Whether this is a null (no-op) implementation.
    fn is_null(&self) -> bool {
        false
    }
}

/// Discards every snapshot. The default when nothing is configured.
pub struct NullConfigurationPersister;

#[async_trait]
impl ConfigurationPersister for NullConfigurationPersister {
    async fn store(&self, _model: &ModelNode) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_null(&self) -> bool {
        true
    }
}

/// Keeps the most recent snapshot in memory.
#[derive(Default)]
pub struct InMemoryConfigurationPersister {
    latest: Mutex<Option<ModelNode>>,
    stores: Mutex<u64>,
}

impl InMemoryConfigurationPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last stored snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<ModelNode> {
        self.latest.lock().clone()
    }

    /// How many snapshots have been stored.
    #[must_use]
    pub fn store_count(&self) -> u64 {
        *self.stores.lock()
    }
}

#[async_trait]
impl ConfigurationPersister for InMemoryConfigurationPersister {
    async fn store(&self, model: &ModelNode) -> anyhow::Result<()> {
        *self.latest.lock() = Some(model.clone());
        *self.stores.lock() += 1;
        Ok(())
    }
}
