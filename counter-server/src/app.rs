//! Server assembly: listener, router, background tasks and shutdown sequence.

use crate::cleanup::spawn_sweep_task;
use crate::config::Config;
use crate::error::Result;
use crate::http::{build_router, EntryPage};
use crate::service::CounterService;
use crate::shutdown::{ShutdownCause, ShutdownReport, ShutdownTrigger};
use crate::store::CounterStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle returned by [`start`]. Keeps background tasks alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    service: Arc<CounterService>,
    stop_http: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
    sweeper: JoinHandle<()>,
}

/// Load state from the store, bind the listener and start serving.
///
/// The store is read before the listener is bound; a store that cannot be
/// read means nothing is ever served.
pub async fn start(
    config: Config,
    store: Arc<dyn CounterStore>,
    trigger: ShutdownTrigger,
) -> Result<ServerHandle> {
    let page = EntryPage::load(&config.http)?;
    let service = Arc::new(CounterService::load(config, store).await?);

    let config = service.config();
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    let local_addr = listener.local_addr()?;

    let sweeper = spawn_sweep_task(service.clone(), config.cleanup.clone());
    let router = build_router(service.clone(), page);

    let (stop_http, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await;
        if let Err(e) = &result {
            tracing::error!("HTTP server error: {}", e);
            trigger.trigger(ShutdownCause::Fatal(format!("HTTP server failed: {}", e)));
        }
        result
    });

    tracing::info!("Server is running on http://{}", local_addr);

    Ok(ServerHandle {
        local_addr,
        service,
        stop_http,
        server,
        sweeper,
    })
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The running service.
    pub fn service(&self) -> &Arc<CounterService> {
        &self.service
    }

    /// Run the graceful shutdown sequence within the configured deadline.
    ///
    /// Mutations stop first, then the final counter is flushed and the store
    /// closed, then clients and the HTTP listener are closed.
    pub async fn shutdown(self, cause: ShutdownCause) -> ShutdownReport {
        let deadline = self.service.config().server.shutdown_timeout();
        tracing::info!("Shutting down gracefully ({})", cause);

        match tokio::time::timeout(deadline, self.run_shutdown(cause.clone())).await {
            Ok(report) => report,
            Err(_) => {
                tracing::error!(
                    "Shutdown did not finish within {}s",
                    deadline.as_secs_f64()
                );
                ShutdownReport::timed_out(cause)
            }
        }
    }

    async fn run_shutdown(self, cause: ShutdownCause) -> ShutdownReport {
        let service = self.service;

        let final_value = service.stop_accepting().await;
        self.sweeper.abort();

        let store_closed = match service.close_store(final_value).await {
            Ok(()) => {
                tracing::info!("Store closed (final counter: {})", final_value);
                true
            }
            Err(e) => {
                tracing::error!("Error closing store: {}", e);
                false
            }
        };

        let clients_closed = service.close_clients();
        tracing::info!("Closed {} client connections", clients_closed);

        let _ = self.stop_http.send(());
        let http_stopped = match self.server.await {
            Ok(Ok(())) => {
                tracing::info!("HTTP server closed");
                true
            }
            Ok(Err(e)) => {
                tracing::error!("Error closing HTTP server: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("HTTP server task failed: {}", e);
                false
            }
        };

        ShutdownReport {
            cause,
            store_closed,
            clients_closed,
            http_stopped,
            timed_out: false,
        }
    }
}
