//! Service assembly: wires registry, verifier, hub and ingestor behind the
//! HTTP/WebSocket server.

use crate::config::{RegistryKind, ServiceConfig};
use crate::detector::DetectorClient;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, ServiceEvent, ServiceEventsChannel, ServiceEventsSender};
use crate::hub::NotificationHub;
use crate::ingest::DetectionIngestor;
use crate::registry::{
    DeploymentDescriptor, EvmRegistryClient, RegistryClient, RegistryVerifier, StaticRegistry,
};
use crate::server::{router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Builder for constructing the service.
pub struct ServiceBuilder {
    config: ServiceConfig,
    registry: Option<Arc<dyn RegistryClient>>,
}

impl ServiceBuilder {
    /// Create a new service builder with the given configuration.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    /// Use this registry client instead of the one named in the
    /// configuration.
    #[must_use]
    pub fn with_registry_client(mut self, client: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(client);
        self
    }

    /// Build the pipeline and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry client cannot be created (missing or
    /// invalid deployment descriptor, unreadable fixtures), the detector
    /// client cannot be built, or the listen address cannot be bound.
    pub async fn build(self) -> Result<RunningService> {
        info!("Building plate-verifier with config: {:?}", self.config);

        let registry = match self.registry {
            Some(client) => client,
            None => registry_from_config(&self.config)?,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let verifier = Arc::new(RegistryVerifier::new(
            registry,
            self.config.verifier.clone(),
            &self.config.cache,
        ));
        let hub = Arc::new(NotificationHub::new(self.config.hub.clone()));
        let ingestor = Arc::new(
            DetectionIngestor::new(&self.config.ingest, Arc::clone(&verifier), Arc::clone(&hub))
                .with_events(events_tx.clone()),
        );
        let detector = DetectorClient::from_config(&self.config.detector)?;
        if detector.is_none() {
            info!("No detector configured; /detect is disabled");
        }

        let listener = TcpListener::bind(self.config.listen).await?;
        let local_addr = listener.local_addr()?;

        let state = AppState {
            ingestor,
            verifier,
            hub,
            detector,
            session: self.config.session.clone(),
            shutdown: shutdown_rx.clone(),
            events: events_tx.clone(),
        };

        Ok(RunningService {
            config: self.config,
            local_addr,
            listener: Some(listener),
            state,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
        })
    }
}

fn registry_from_config(config: &ServiceConfig) -> Result<Arc<dyn RegistryClient>> {
    let registry = &config.registry;
    match registry.kind {
        RegistryKind::Static => {
            let path = registry.static_records.as_ref().ok_or_else(|| {
                Error::Config("static registry requires registry.static_records".to_string())
            })?;
            Ok(Arc::new(StaticRegistry::from_file(path)?))
        }
        RegistryKind::Evm => {
            let descriptor = DeploymentDescriptor::from_file(&registry.deployment_path)?;
            let client = EvmRegistryClient::new(
                registry.rpc_url.clone(),
                &descriptor,
                &registry.lookup_method,
                config.verifier.per_attempt_timeout,
            )?;
            Ok(Arc::new(client))
        }
    }
}

/// Requests shutdown of a running service from elsewhere.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// A bound, ready-to-run service.
pub struct RunningService {
    config: ServiceConfig,
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    state: AppState,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: ServiceEventsSender,
    events_rx: Option<ServiceEventsChannel>,
}

impl RunningService {
    /// Address the server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Service configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Pipeline entry point, for embedding without HTTP.
    #[must_use]
    pub fn ingestor(&self) -> Arc<DetectionIngestor> {
        Arc::clone(&self.state.ingestor)
    }

    /// Notification hub.
    #[must_use]
    pub fn hub(&self) -> Arc<NotificationHub> {
        Arc::clone(&self.state.hub)
    }

    /// Registry verifier.
    #[must_use]
    pub fn verifier(&self) -> Arc<RegistryVerifier> {
        Arc::clone(&self.state.verifier)
    }

    /// Get a receiver for service events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<ServiceEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to service events.
    #[must_use]
    pub fn subscribe_events(&self) -> ServiceEventsChannel {
        self.events_tx.subscribe()
    }

    /// Handle that can stop the service while [`Self::run`] is in progress.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Serve until shutdown is requested or Ctrl-C is received.
    ///
    /// Open sessions observe the shutdown, drain their queues and close
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the service was already run or the server fails.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::Server("service already ran".to_string()))?;

        info!("plate-verifier listening on {}", self.local_addr);
        let _ = self.events_tx.send(ServiceEvent::Started {
            addr: self.local_addr,
        });

        let shutdown_rx = self.shutdown_rx.clone();
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let signal = async move {
            tokio::select! {
                () = shutdown_requested(shutdown_rx) => {
                    info!("Shutdown signal received");
                }
                () = ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    let _ = shutdown_tx.send(true);
                }
            }
        };

        let app = router(self.state.clone());
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await;

        let _ = self.events_tx.send(ServiceEvent::ShuttingDown);
        served.map_err(|e| Error::Server(e.to_string()))?;
        info!("plate-verifier shutdown complete");
        Ok(())
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
