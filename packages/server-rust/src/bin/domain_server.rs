//! Domain server process.
//!
//! Boots the kernel, connects to the initial host controller and then
//! follows reconnection requests read from stdin until the channel closes.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use keel_core::{PathElement, ResourceDescription};
use keel_server::logging::{init_logging, LogFormat};
use keel_server::management::ModelController;
use keel_server::reconnect::{
    install_communication_services, server_controller_service_name, HostControllerEndpoint,
    ReconnectionCoordinator,
};
use keel_server::service::ValueService;
use keel_server::{threads, KernelConfig, ReconnectPolicy, ServiceRegistry};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "keel-domain-server", about = "Keel domain server")]
struct DomainServerArgs {
    /// Name this server registers under with the host controller
    #[arg(long, env = "KEEL_SERVER_NAME", default_value = "server-one")]
    server_name: String,

    #[arg(long, env = "KEEL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "KEEL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Consecutive interrupted reconnections tolerated before exiting
    #[arg(long, env = "KEEL_MAX_INTERRUPT_RETRIES", default_value_t = 5)]
    max_interrupt_retries: u32,

    /// Host controller to connect to before the first reconnection request
    #[arg(long, env = "KEEL_INITIAL_HOST", default_value = "127.0.0.1")]
    initial_host: String,

    #[arg(long, env = "KEEL_INITIAL_PORT", default_value_t = 9999)]
    initial_port: u16,

    /// Service resolution timeout in milliseconds (0 waits indefinitely)
    #[arg(long, env = "KEEL_RESOLVE_TIMEOUT_MS", default_value_t = 30_000)]
    resolve_timeout_ms: u64,
}

impl DomainServerArgs {
    fn kernel_config(&self) -> KernelConfig {
        KernelConfig {
            node_id: self.server_name.clone(),
            resolve_timeout: (self.resolve_timeout_ms > 0)
                .then_some(Duration::from_millis(self.resolve_timeout_ms)),
            reconnect: ReconnectPolicy {
                max_consecutive_interrupts: self.max_interrupt_retries,
                ..ReconnectPolicy::default()
            },
            ..KernelConfig::default()
        }
    }
}

fn model_controller(registry: &Arc<ServiceRegistry>) -> anyhow::Result<ModelController> {
    let controller = ModelController::with_root(
        Arc::clone(registry),
        Arc::new(ResourceDescription::new("The root of the server's management model").child(
            "profile",
            "Named sets of subsystem configurations",
            0,
        )),
    )?;
    let profile = controller.registration().register_sub_model(
        PathElement::wildcard("profile"),
        Arc::new(
            ResourceDescription::new("A named set of subsystem configs")
                .child(threads::SUBSYSTEM, "The subsystems that make up the profile", 0),
        ),
    )?;
    threads::register(&profile)?;
    Ok(controller)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DomainServerArgs::parse();
    init_logging(args.log_format, &args.log_level)?;

    let config = args.kernel_config();
    let stability_timeout = config.stability_timeout;
    let registry = ServiceRegistry::new(config);

    let controller = Arc::new(model_controller(&registry)?);
    registry
        .add_service(
            server_controller_service_name(),
            Arc::new(ValueService::from_arc(Arc::clone(&controller))),
        )
        .install()?;

    let endpoint = HostControllerEndpoint {
        host: args.initial_host.clone(),
        port: args.initial_port,
    };
    install_communication_services(&registry, &args.server_name, endpoint)?;
    if !registry.await_stability(stability_timeout).await {
        warn!("services did not settle before the control loop started");
    }
    info!(server = %args.server_name, "domain server started");

    let coordinator = ReconnectionCoordinator::new(Arc::clone(&registry), args.server_name.clone());
    let cancel = coordinator.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let exit = coordinator.run(tokio::io::stdin()).await;
    controller.shutdown();
    if !registry.shutdown().await {
        warn!("services did not stop before the shutdown timeout");
    }
    std::process::exit(exit.exit_code());
}
