//! Replaces the host controller communication services on request.
//!
//! The control loop reads [`ControlMessage`]s from the control channel. For
//! every new endpoint it asks the client and connection services to be
//! removed, waits on a countdown latch until both are REMOVED, and installs
//! fresh services wired to the new endpoint.
//!
//! A removal wait that is cut short leaves the old services on their way
//! out. The next request waits for whatever is still registered and then
//! installs with the server name remembered from the earlier attempt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{ControlMessage, ReconnectCodec};
use super::error::ReconnectError;
use super::services::{
    client_service_name, connection_service_name, install_communication_services,
    HostControllerClient, HostControllerEndpoint,
};
use crate::config::ReconnectPolicy;
use crate::service::resolve::on_removal;
use crate::service::{ControllerHandle, Mode, ResolveError, ServiceRegistry};

const READ_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// CountdownLatch
// ---------------------------------------------------------------------------

/// Async countdown latch: `wait` returns once `count_down` has been called
/// the initial number of times.
#[derive(Debug)]
pub struct CountdownLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CountdownLatch {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    /// Decrements the count; does nothing once it is zero.
    pub fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// How the control loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// The control channel ended cleanly or the loop was cancelled.
    Shutdown,
    /// An unrecoverable channel or reconnection failure.
    Fatal(ReconnectError),
}

impl LoopExit {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Shutdown => 0,
            Self::Fatal(_) => 1,
        }
    }
}

/// Swaps the host controller connection and client services.
pub struct ReconnectionCoordinator {
    registry: Arc<ServiceRegistry>,
    server_name: String,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    /// Server name of the most recent attempt, kept for when the client
    /// service is already gone.
    last_server: Mutex<Option<String>>,
}

impl ReconnectionCoordinator {
    /// `server_name` is used when the current client does not report one.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, server_name: impl Into<String>) -> Self {
        let policy = registry.config().reconnect.clone();
        Self {
            registry,
            server_name: server_name.into(),
            policy,
            cancel: CancellationToken::new(),
            last_server: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Token that interrupts a pending removal wait and stops the loop.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Tears down the current communication services and installs new ones
    /// for `endpoint`. Returns the new connection and client handles.
    ///
    /// Services already gone are skipped; ones still being removed are
    /// waited for.
    ///
    /// # Errors
    ///
    /// `Resolve(Cancelled | Timeout)` when the removal wait is interrupted
    /// (retryable), `Install` when the new services cannot be installed.
    pub async fn reconnect(
        &self,
        endpoint: HostControllerEndpoint,
    ) -> Result<(ControllerHandle, ControllerHandle), ReconnectError> {
        let present: Vec<ControllerHandle> = [client_service_name(), connection_service_name()]
            .iter()
            .filter_map(|name| self.registry.get(name))
            .collect();
        let server_name = {
            let mut last = self.last_server.lock();
            let name = present
                .iter()
                .find_map(ControllerHandle::value_as::<HostControllerClient>)
                .map(|c| c.server_name().to_string())
                .or_else(|| last.clone())
                .unwrap_or_else(|| self.server_name.clone());
            *last = Some(name.clone());
            name
        };

        let latch = Arc::new(CountdownLatch::new(present.len()));
        let listeners: Vec<_> = present
            .iter()
            .map(|handle| {
                let latch = Arc::clone(&latch);
                let id = handle.add_listener(on_removal(move || latch.count_down()));
                handle.set_mode(Mode::Remove);
                id
            })
            .collect();

        let limit = self.registry.config().resolve_timeout;
        let expired = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let waiting_on = client_service_name();
        let waited = tokio::select! {
            biased;
            () = latch.wait() => Ok(()),
            () = self.cancel.cancelled() => Err(ResolveError::Cancelled { name: waiting_on }),
            () = expired => Err(ResolveError::Timeout { name: waiting_on }),
        };
        for (handle, id) in present.iter().zip(listeners) {
            handle.remove_listener(id);
        }
        waited?;

        debug!(%endpoint, removed = present.len(), "previous communication services gone");
        let installed = install_communication_services(&self.registry, &server_name, endpoint.clone())?;
        info!(server = %server_name, %endpoint, "reconnected to host controller");
        Ok(installed)
    }

    /// Runs the control loop over `channel` until it ends.
    ///
    /// Interrupted reads and interrupted removal waits are retried with
    /// backoff, up to the policy's limit of consecutive interrupts; the
    /// interrupted request itself is dropped and the next one is read.
    pub async fn run<R>(&self, mut channel: R) -> LoopExit
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut codec = ReconnectCodec::new();
        let mut buf = BytesMut::with_capacity(READ_CAPACITY);
        let mut interrupts = 0_u32;
        let mut eof = false;

        loop {
            let decoded = if eof {
                codec.decode_eof(&mut buf)
            } else {
                codec.decode(&mut buf)
            };
            match decoded {
                Ok(Some(ControlMessage::AuthKey(_))) => {
                    debug!("control channel authenticated");
                    continue;
                }
                Ok(Some(ControlMessage::Reconnect { host, port })) => {
                    let endpoint = HostControllerEndpoint { host, port };
                    match self.reconnect(endpoint).await {
                        Ok(_) => {
                            interrupts = 0;
                            metrics::counter!("keel_reconnects_total", "outcome" => "ok").increment(1);
                        }
                        Err(e) if e.is_interrupt() => {
                            metrics::counter!("keel_reconnects_total", "outcome" => "interrupted").increment(1);
                            if let Err(exit) = self.back_off(&mut interrupts, e).await {
                                return exit;
                            }
                        }
                        Err(e) => return fatal(e),
                    }
                    continue;
                }
                Ok(None) if eof => {
                    if !codec.is_authenticated() {
                        return fatal(ReconnectError::Auth { received: 0 });
                    }
                    info!("control channel closed, shutting down");
                    return LoopExit::Shutdown;
                }
                Ok(None) => {}
                Err(e) => return fatal(e),
            }

            let read = tokio::select! {
                read = channel.read_buf(&mut buf) => read,
                () = self.cancel.cancelled() => return LoopExit::Shutdown,
            };
            match read {
                Ok(0) => eof = true,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    if let Err(exit) = self.back_off(&mut interrupts, e.into()).await {
                        return exit;
                    }
                }
                Err(e) => return fatal(e.into()),
            }
        }
    }

    /// Counts an interrupt and sleeps for the policy backoff plus up to a
    /// quarter of jitter; gives up past the policy limit.
    async fn back_off(&self, interrupts: &mut u32, cause: ReconnectError) -> Result<(), LoopExit> {
        *interrupts += 1;
        if *interrupts > self.policy.max_consecutive_interrupts {
            return Err(fatal(cause));
        }
        let base = self.policy.backoff(*interrupts);
        let delay = base + base.mul_f64(rand::rng().random_range(0.0..0.25));
        warn!(error = %cause, attempt = *interrupts, ?delay, "interrupted, retrying");
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

fn fatal(cause: ReconnectError) -> LoopExit {
    error!(error = %cause, "reconnection loop failed");
    LoopExit::Fatal(cause)
}
