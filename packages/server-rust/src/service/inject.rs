//! Value injection between services.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::controller::ServiceValue;

/// Receives a dependency's value before the dependent starts and is cleared
/// after the dependent stops.
pub trait Injector: Send + Sync {
    /// Hands over the value.
    ///
    /// # Errors
    ///
    /// Fails when the value is not of the expected type; the dependent then
    /// fails to start.
    fn inject(&self, value: ServiceValue) -> anyhow::Result<()>;

    fn uninject(&self);
}

/// Lock-free typed injection slot, shared between a service and the
/// controller that fills it.
pub struct InjectedValue<T> {
    slot: ArcSwapOption<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InjectedValue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            _marker: PhantomData,
        }
    }

    /// Current value, if injected.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Current value, failing when nothing has been injected.
    ///
    /// # Errors
    ///
    /// Returns an error when the slot is empty.
    pub fn require(&self) -> anyhow::Result<Arc<T>> {
        self.get()
            .ok_or_else(|| anyhow::anyhow!("no value injected for {}", std::any::type_name::<T>()))
    }

    /// Stores a value directly, for constant injections.
    pub fn set(&self, value: Arc<T>) {
        self.slot.store(Some(value));
    }
}

impl<T> Default for InjectedValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InjectedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedValue")
            .field("type", &std::any::type_name::<T>())
            .field("injected", &self.slot.load().is_some())
            .finish()
    }
}

impl<T: Any + Send + Sync> Injector for InjectedValue<T> {
    fn inject(&self, value: ServiceValue) -> anyhow::Result<()> {
        let typed = value.downcast::<T>().map_err(|_| {
            anyhow::anyhow!(
                "injected value is not a {}",
                std::any::type_name::<T>()
            )
        })?;
        self.slot.store(Some(typed));
        Ok(())
    }

    fn uninject(&self) {
        self.slot.store(None);
    }
}
