//! Runtime assembly
//!
//! Wires the platform client, the stores and the proxy components into the
//! event intake, and runs it until interrupted.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chorus_core::Snowflake;
use chorus_http::PlatformClient;
use chorus_proxy::{
    MemoryStore, MemoryTtlStore, PersonaBotSync, SharedPersonaStore, SharedPlatform,
    SharedProvenanceStore, SharedSessionStore, SharedTtlStore,
};

use crate::{
    build_http_router, build_router, spawn_retention_sweeper, AppState, Authenticator,
    Deduplicator, ProxyServices, RuntimeConfig, TaskSupervisor,
};

/// Everything the runtime talks to
#[derive(Clone)]
pub struct Backends {
    pub platform: SharedPlatform,
    pub personas: SharedPersonaStore,
    pub sessions: SharedSessionStore,
    pub provenance: SharedProvenanceStore,
    pub markers: SharedTtlStore,
}

impl Backends {
    /// In-process stores; state does not survive a restart
    pub fn in_memory(platform: SharedPlatform) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            platform,
            personas: store.clone(),
            sessions: store.clone(),
            provenance: store,
            markers: Arc::new(MemoryTtlStore::new()),
        }
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    application_id: Snowflake,
    backends: Backends,
    services: Arc<ProxyServices>,
    supervisor: TaskSupervisor,
}

impl Runtime {
    /// Build against the live platform with in-memory stores
    pub fn new(config: RuntimeConfig) -> Result<Self, anyhow::Error> {
        config.validate()?;
        let client = PlatformClient::new(config.platform_config()).context("building platform client")?;
        let backends = Backends::in_memory(Arc::new(client));
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: RuntimeConfig, backends: Backends) -> Result<Self, anyhow::Error> {
        let application_id = config.resolved_application_id()?;
        let services = Arc::new(ProxyServices::new(&backends, config.token(), application_id, &config));

        Ok(Self {
            config,
            application_id,
            backends,
            services,
            supervisor: TaskSupervisor::new(),
        })
    }

    pub fn application_id(&self) -> Snowflake {
        self.application_id
    }

    pub fn services(&self) -> Arc<ProxyServices> {
        self.services.clone()
    }

    pub fn supervisor(&self) -> TaskSupervisor {
        self.supervisor.clone()
    }

    /// Persona bot reconciliation against the same platform and stores
    pub fn persona_bot_sync(&self) -> PersonaBotSync {
        PersonaBotSync::new(
            self.backends.platform.clone(),
            self.backends.personas.clone(),
            self.config.sync_config(),
        )
    }

    pub fn app_state(&self) -> Result<Arc<AppState>, anyhow::Error> {
        let mut authenticator = Authenticator::new(
            self.application_id,
            self.config.verifying_key()?,
            self.backends.personas.clone(),
        );
        if let Some(skew) = self.config.timestamp_skew_secs {
            authenticator = authenticator.with_max_skew(Duration::from_secs(skew));
        }

        Ok(Arc::new(AppState {
            authenticator,
            deduplicator: Deduplicator::new(
                self.backends.markers.clone(),
                &self.config.replica_id,
                self.config.dedup_ttl(),
            ),
            router: Arc::new(build_router(self.services.clone())),
            supervisor: self.supervisor.clone(),
        }))
    }

    /// Serve until ctrl-c, then drain in-flight work
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let bind_addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind event intake on {bind_addr}"))?;
        let local_addr = listener.local_addr().context("failed to resolve bound address")?;
        self.serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
        info!("Event intake on {} stopped", local_addr);
        Ok(())
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let state = self.app_state()?;
        spawn_retention_sweeper(
            &self.supervisor,
            self.backends.provenance.clone(),
            self.config.retention(),
            Duration::from_secs(self.config.retention_sweep_interval_secs),
        );

        info!(
            "Chorus {} listening on {} (replica {})",
            self.application_id,
            listener.local_addr().map(|addr| addr.to_string()).unwrap_or_default(),
            self.config.replica_id
        );
        let served = axum::serve(listener, build_http_router(state))
            .with_graceful_shutdown(shutdown)
            .await;

        if !self.supervisor.drain(self.config.drain_timeout()).await {
            warn!("Shut down with work still in flight");
        }
        served.context("event intake exited unexpectedly")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_proxy::testing::{service_token, FakePlatform, SERVICE_APP_ID};
    use ed25519_dalek::SigningKey;

    fn config() -> RuntimeConfig {
        RuntimeConfig::default()
            .with_bind("127.0.0.1:0")
            .with_bot_token(service_token().expose())
            .with_public_key(&hex::encode(SigningKey::from_bytes(&[7; 32]).verifying_key().to_bytes()))
    }

    #[test]
    fn test_builds_from_config() {
        let backends = Backends::in_memory(Arc::new(FakePlatform::new()));
        let runtime = Runtime::with_backends(config(), backends).unwrap();
        assert_eq!(runtime.application_id(), SERVICE_APP_ID);
        assert!(runtime.app_state().is_ok());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = Runtime::new(config().with_public_key("nope"));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let backends = Backends::in_memory(Arc::new(FakePlatform::new()));
        let runtime = Runtime::with_backends(config(), backends).unwrap();
        let supervisor = runtime.supervisor();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(runtime.serve(listener, async move {
            let _ = stopped.await;
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let health = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
        assert_eq!(health.status(), 200);

        stop.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert_eq!(supervisor.in_flight(), 0);
    }
}
