//! The host controller communication services the coordinator replaces.
//!
//! `jboss.host.controller.connection` publishes the endpoint of the host
//! controller; `jboss.host.controller.client` depends on it and on the
//! server controller and carries the server's name.

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::ServiceName;
use tracing::info;

use crate::service::{
    ControllerHandle, InjectedValue, Mode, Service, ServiceError, ServiceRegistry, ServiceValue,
    StartContext,
};

fn name(s: &'static str) -> ServiceName {
    s.parse().expect("static service names are well-formed")
}

#[must_use]
pub fn connection_service_name() -> ServiceName {
    name("jboss.host.controller.connection")
}

#[must_use]
pub fn client_service_name() -> ServiceName {
    name("jboss.host.controller.client")
}

#[must_use]
pub fn server_controller_service_name() -> ServiceName {
    name("jboss.server.controller")
}

/// Address of the host controller this server talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostControllerEndpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostControllerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Publishes a [`HostControllerEndpoint`].
pub struct HostControllerConnectionService {
    endpoint: Arc<HostControllerEndpoint>,
}

impl HostControllerConnectionService {
    #[must_use]
    pub fn new(endpoint: HostControllerEndpoint) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
        }
    }
}

#[async_trait]
impl Service for HostControllerConnectionService {
    async fn start(&self, _ctx: &StartContext) -> anyhow::Result<ServiceValue> {
        info!(endpoint = %self.endpoint, "host controller connection ready");
        Ok(self.endpoint.clone())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!(endpoint = %self.endpoint, "host controller connection closed");
        Ok(())
    }
}

/// Value of the client service.
#[derive(Debug, Clone)]
pub struct HostControllerClient {
    server_name: String,
    endpoint: Arc<HostControllerEndpoint>,
}

impl HostControllerClient {
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    #[must_use]
    pub fn endpoint(&self) -> &HostControllerEndpoint {
        &self.endpoint
    }
}

/// Client of the host controller, started once both the connection and the
/// server controller are UP.
pub struct HostControllerClientService {
    server_name: String,
    connection: Arc<InjectedValue<HostControllerEndpoint>>,
}

impl HostControllerClientService {
    #[must_use]
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            connection: Arc::new(InjectedValue::new()),
        }
    }
}

#[async_trait]
impl Service for HostControllerClientService {
    async fn start(&self, _ctx: &StartContext) -> anyhow::Result<ServiceValue> {
        let endpoint = self.connection.require()?;
        info!(server = %self.server_name, endpoint = %endpoint, "registered with host controller");
        Ok(Arc::new(HostControllerClient {
            server_name: self.server_name.clone(),
            endpoint,
        }))
    }
}

/// Installs the connection and client services for `endpoint`.
///
/// # Errors
///
/// Fails when either name is still taken or the server controller service is
/// not registered.
pub fn install_communication_services(
    registry: &ServiceRegistry,
    server_name: &str,
    endpoint: HostControllerEndpoint,
) -> Result<(ControllerHandle, ControllerHandle), ServiceError> {
    let connection = registry
        .add_service(
            connection_service_name(),
            Arc::new(HostControllerConnectionService::new(endpoint)),
        )
        .install()?;

    let client = HostControllerClientService::new(server_name);
    let injector = client.connection.clone();
    let installed = registry
        .add_service(client_service_name(), Arc::new(client))
        .add_injected_dependency(connection_service_name(), injector)
        .add_dependency(server_controller_service_name())
        .install();
    match installed {
        Ok(client) => Ok((connection, client)),
        Err(e) => {
            connection.set_mode(Mode::Remove);
            Err(e)
        }
    }
}
