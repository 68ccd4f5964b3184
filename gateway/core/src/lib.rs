//! Gateway Core - Shared Access to a Concurrency-Limited LLM Backend
//!
//! This crate mediates access to a single, expensive text-generation backend
//! shared by many callers. It accepts requests of varying priority, bounds the
//! number of calls in flight, avoids redundant work through a two-tier cache,
//! optionally enriches prompts with retrieved context, and steers each request
//! to the model best suited to current host load and request complexity.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Callers                                │
//! │        submit / await_response / metrics / health_check          │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          Dispatcher                              │
//! │  ┌─────────────┐  ┌──────────┴───┐  ┌────────────────────────┐   │
//! │  │ Prioritizer │  │ Ticket queue │  │ Concurrency gate       │   │
//! │  │ score/quota │  │ + results    │  │ (semaphore)            │   │
//! │  └─────────────┘  └──────────────┘  └────────────────────────┘   │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────────┐   │
//! │  │ Distributed │  │ Model Router │  │ Monitor                │   │
//! │  │ Cache       │  │ + EMA perf   │  │ counters / p95 / health│   │
//! │  └──────┬──────┘  └──────┬───────┘  └────────────────────────┘   │
//! └─────────┼────────────────┼───────────────────────────────────────┘
//!           │                │
//!     SharedStore      InferenceBackend        Retriever
//!    (remote tier)     (Ollama, mocks)      (context search)
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use gateway_core::{
//!     Dispatcher, GatewayConfig, HostMetrics, MemoryStore, NoopRetriever, OllamaBackend, Request,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GatewayConfig::default();
//!     let dispatcher = Dispatcher::from_config(
//!         &config,
//!         Arc::new(OllamaBackend::from_env()),
//!         Arc::new(HostMetrics::new()),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(NoopRetriever),
//!     );
//!     dispatcher.start();
//!
//!     let id = dispatcher.submit(Request::new("Why is the sky blue?")).unwrap();
//!     let response = dispatcher.await_response(&id, None).await.unwrap();
//!     println!("{}", response.text);
//!
//!     dispatcher.shutdown().await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`dispatcher`]: queue, gate, single-flight, enrichment, result delivery
//! - [`routing`]: model catalog, complexity, host metrics, scoring router
//! - [`cache`]: local LRU tier plus shared tier, per-class TTLs
//! - [`prioritizer`]: priority scores, per-caller quotas, timeouts
//! - [`monitor`]: counters, latency percentiles, health state
//! - [`backend`]: inference backend trait and Ollama client
//! - [`config`]: TOML and environment configuration
//! - [`request`]: request and response types
//! - [`error`]: error taxonomy

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod prioritizer;
pub mod request;
pub mod routing;

// Re-exports for convenience
pub use backend::{BackendError, Generation, GenerationRequest, InferenceBackend, OllamaBackend};
pub use cache::{
    CacheClass, CacheConfig, CacheStats, DistributedCache, MemoryStore, RedisStore, SharedStore,
    StoreError,
};
pub use dispatcher::{
    Components, Dispatcher, DispatcherConfig, EnrichmentConfig, MaintenanceReport, NoopRetriever,
    RetrievalError, Retriever,
};
pub use error::{AwaitError, GatewayError, QuotaViolation, Result};
pub use monitor::{HealthStatus, HealthThresholds, MetricsSnapshot, Monitor, MonitorConfig};
pub use prioritizer::{Prioritizer, PrioritizerConfig, QuotaTable, TierQuota, TimeoutTable};
pub use request::{CallerTier, PriorityLabel, Request, RequestId, Response, SamplingParams};
pub use routing::{
    CapabilityClass, HostMetrics, ModelDescriptor, ModelRouter, RouteReason, RouterConfig,
    RouterError, RoutingDecision, StaticMetrics, SystemMetricsSource,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendConfig, ConfigError,
    ConfigSource, GatewayConfig,
};
