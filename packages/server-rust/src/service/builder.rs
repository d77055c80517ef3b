//! Fluent service installation.

use std::sync::Arc;

use keel_core::ServiceName;

use super::controller::{ControllerHandle, Dependency, Mode, Service};
use super::error::ServiceError;
use super::inject::Injector;
use super::registry::ServiceRegistry;

/// Collects dependencies and the initial mode before installing a service.
#[must_use = "a service is only installed by calling `install`"]
pub struct ServiceBuilder<'a> {
    registry: &'a ServiceRegistry,
    name: ServiceName,
    service: Arc<dyn Service>,
    dependencies: Vec<Dependency>,
    mode: Mode,
}

impl<'a> ServiceBuilder<'a> {
    pub(crate) fn new(registry: &'a ServiceRegistry, name: ServiceName, service: Arc<dyn Service>) -> Self {
        Self {
            registry,
            name,
            service,
            dependencies: Vec::new(),
            mode: Mode::Active,
        }
    }

    pub fn add_dependency(mut self, name: ServiceName) -> Self {
        self.dependencies.push(Dependency { name, injector: None });
        self
    }

    /// Adds a dependency whose value is injected before the service starts.
    pub fn add_injected_dependency(mut self, name: ServiceName, injector: Arc<dyn Injector>) -> Self {
        self.dependencies.push(Dependency {
            name,
            injector: Some(injector),
        });
        self
    }

    /// Defaults to [`Mode::Active`].
    pub fn set_initial_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// # Errors
    ///
    /// Fails on a duplicate name or an unregistered dependency.
    pub fn install(self) -> Result<ControllerHandle, ServiceError> {
        self.registry
            .install(self.name, self.service, self.dependencies, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::KernelConfig;
    use crate::service::controller::State;
    use crate::service::inject::InjectedValue;
    use crate::service::value::ValueService;

    #[tokio::test]
    async fn injected_value_is_visible_while_up() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let endpoint: ServiceName = "net.endpoint".parse().unwrap();
        let client: ServiceName = "net.client".parse().unwrap();

        registry
            .add_service(endpoint.clone(), Arc::new(ValueService::new(8080_u16)))
            .install()
            .unwrap();

        let port = Arc::new(InjectedValue::<u16>::new());
        let handle = registry
            .add_service(client, Arc::new(ValueService::new("client".to_string())))
            .add_injected_dependency(endpoint, port.clone())
            .install()
            .unwrap();

        assert!(registry.await_stability(Duration::from_secs(5)).await);
        assert_eq!(handle.state(), State::Up);
        assert_eq!(*port.require().unwrap(), 8080);

        handle.set_mode(Mode::Never);
        assert!(registry.await_stability(Duration::from_secs(5)).await);
        assert!(port.get().is_none());
    }

    #[tokio::test]
    async fn wrong_injected_type_fails_start() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let source: ServiceName = "source".parse().unwrap();
        registry
            .add_service(source.clone(), Arc::new(ValueService::new(1_i32)))
            .install()
            .unwrap();

        let handle = registry
            .add_service("sink".parse().unwrap(), Arc::new(ValueService::new(())))
            .add_injected_dependency(source, Arc::new(InjectedValue::<String>::new()))
            .install()
            .unwrap();

        assert!(registry.await_stability(Duration::from_secs(5)).await);
        assert_eq!(handle.state(), State::StartFailed);
    }

    #[tokio::test]
    async fn initial_mode_never_stays_down() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let handle = registry
            .add_service("idle".parse().unwrap(), Arc::new(ValueService::new(())))
            .set_initial_mode(Mode::Never)
            .install()
            .unwrap();
        assert!(registry.await_stability(Duration::from_secs(5)).await);
        assert_eq!(handle.state(), State::Down);
    }
}
