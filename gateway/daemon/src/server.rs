//! Component wiring and the serve loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use gateway_core::{
    Dispatcher, GatewayConfig, HealthStatus, HostMetrics, MemoryStore, NoopRetriever,
    OllamaBackend, RedisStore, SharedStore,
};

/// Backend client for the configured host
pub fn backend(config: &GatewayConfig) -> OllamaBackend {
    OllamaBackend::new(
        config.backend.host.clone(),
        config.backend.port,
        config.backend.request_timeout(),
    )
}

/// Redis when `cache.shared_url` is set and reachable, the in-process store
/// otherwise
pub async fn shared_store(config: &GatewayConfig) -> Arc<dyn SharedStore> {
    let Some(url) = config.cache.shared_url.as_deref() else {
        return Arc::new(MemoryStore::new());
    };
    match RedisStore::connect(url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(url = %url, error = %e, "Shared cache unavailable, using in-process store");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Dispatcher over the Ollama backend, host metrics and the configured
/// shared store
pub async fn build(config: &GatewayConfig) -> Dispatcher {
    Dispatcher::from_config(
        config,
        Arc::new(backend(config)),
        Arc::new(HostMetrics::new()),
        shared_store(config).await,
        Arc::new(NoopRetriever),
    )
}

/// Run until SIGINT or SIGTERM, logging health periodically
pub async fn serve(config: &GatewayConfig, health_interval: Duration) -> Result<()> {
    let dispatcher = build(config).await;

    if !dispatcher.router().backend().health_check().await {
        warn!(
            host = %config.backend.host,
            port = config.backend.port,
            "Backend is not reachable yet; requests will fail until it is"
        );
    }

    dispatcher.start();
    info!(
        models = config.models.len(),
        gate_capacity = config.dispatcher.gate_capacity,
        "Gateway ready"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut ticker = tokio::time::interval(health_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating shutdown");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = dispatcher.metrics();
                let cache = dispatcher.cache_stats();
                let fields = (
                    snapshot.total_requests,
                    snapshot.errors,
                    snapshot.in_flight,
                    snapshot.queued,
                    snapshot.latency.p95,
                );
                if snapshot.health == HealthStatus::Healthy {
                    info!(
                        health = %snapshot.health,
                        requests = fields.0,
                        errors = fields.1,
                        in_flight = fields.2,
                        queued = fields.3,
                        p95_ms = fields.4,
                        cache_local_hits = cache.local_hits,
                        cache_shared_hits = cache.shared_hits,
                        "Gateway health"
                    );
                } else {
                    warn!(
                        health = %snapshot.health,
                        requests = fields.0,
                        errors = fields.1,
                        in_flight = fields.2,
                        queued = fields.3,
                        p95_ms = fields.4,
                        error_rate = snapshot.error_rate,
                        "Gateway health"
                    );
                }
            }
        }
    }

    dispatcher.shutdown().await;
    info!("Gateway daemon stopped cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(store: &dyn SharedStore) -> Option<Vec<u8>> {
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        store.get("k").await.unwrap()
    }

    #[tokio::test]
    async fn test_in_process_store_without_url() {
        let store = shared_store(&GatewayConfig::default()).await;
        assert_eq!(roundtrip(store.as_ref()).await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back() {
        let mut config = GatewayConfig::default();
        config.cache.shared_url = Some("redis://127.0.0.1:1/".into());
        let store = shared_store(&config).await;
        assert_eq!(roundtrip(store.as_ref()).await, Some(b"v".to_vec()));
    }
}
