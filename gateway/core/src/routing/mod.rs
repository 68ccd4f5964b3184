//! Adaptive Model Routing
//!
//! Chooses which model serves a request from a fixed catalog.
//!
//! # Components
//!
//! - [`catalog`]: model descriptors and the default catalog
//! - [`complexity`]: length-based complexity and keyword task hints
//! - [`system`]: host CPU, memory and load sources
//! - [`performance`]: EMA-smoothed latency and success per model
//! - [`router`]: filtering, scoring, hint handling and the backend call
//! - [`test_utils`]: scripted backend used by tests

pub mod catalog;
pub mod complexity;
pub mod performance;
pub mod router;
pub mod system;
pub mod test_utils;

pub use catalog::{default_catalog, smallest, CapabilityClass, ModelDescriptor};
pub use complexity::{task_hint, Complexity, ComplexityThresholds};
pub use performance::{ModelPerformance, PerformanceTracker};
pub use router::{
    ModelRouter, RouteReason, RoutedGeneration, RouterConfig, RouterError, RoutingDecision,
};
pub use system::{HostMetrics, StaticMetrics, SystemMetricsSource, SystemSnapshot};
