//! Domain server reconnection: the control channel codec, the host
//! controller communication services and the coordinator that swaps them.

pub mod codec;
pub mod coordinator;
pub mod error;
pub mod services;

pub use codec::{ControlMessage, ReconnectCodec};
pub use coordinator::{CountdownLatch, LoopExit, ReconnectionCoordinator};
pub use error::ReconnectError;
pub use services::{
    client_service_name, connection_service_name, install_communication_services,
    server_controller_service_name, HostControllerClient, HostControllerEndpoint,
};
