//! Model catalog
//!
//! A small fixed set of [`ModelDescriptor`]s loaded from configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::SamplingParams;

/// What a model is best at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityClass {
    /// Small, low-latency models
    FastResponse,
    /// General-purpose, higher quality
    HighQuality,
    /// Code generation and review
    Code,
    /// Long-form reasoning and analysis
    Analysis,
    /// Creative writing
    Creative,
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FastResponse => "fast-response",
            Self::HighQuality => "high-quality",
            Self::Code => "code",
            Self::Analysis => "analysis",
            Self::Creative => "creative",
        };
        f.write_str(name)
    }
}

/// Static description of a model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Backend model name
    pub name: String,
    /// Capability class
    pub capability: CapabilityClass,
    /// Approximate resident memory in megabytes
    pub memory_mb: u64,
    /// Preferred CPU thread count
    #[serde(default)]
    pub threads: Option<u32>,
    /// Preferred GPU layer offload
    #[serde(default)]
    pub gpu_layers: Option<u32>,
    /// Sampling parameters used when a request does not set its own
    #[serde(default)]
    pub defaults: SamplingParams,
    /// Target maximum latency in milliseconds
    pub target_latency_ms: u64,
    /// Static quality score in [0, 1]
    pub quality: f64,
}

impl ModelDescriptor {
    /// Create a descriptor with default sampling and no hardware hints
    pub fn new(
        name: impl Into<String>,
        capability: CapabilityClass,
        memory_mb: u64,
        quality: f64,
    ) -> Self {
        Self {
            name: name.into(),
            capability,
            memory_mb,
            threads: None,
            gpu_layers: None,
            defaults: SamplingParams::default(),
            target_latency_ms: 10_000,
            quality,
        }
    }

    /// Set target latency
    #[must_use]
    pub fn with_target_latency_ms(mut self, ms: u64) -> Self {
        self.target_latency_ms = ms;
        self
    }

    /// Set default sampling parameters
    #[must_use]
    pub fn with_defaults(mut self, defaults: SamplingParams) -> Self {
        self.defaults = defaults;
        self
    }
}

/// Catalog shipped as the configuration default
#[must_use]
pub fn default_catalog() -> Vec<ModelDescriptor> {
    let precise = SamplingParams {
        temperature: 0.2,
        ..SamplingParams::default()
    };
    let loose = SamplingParams {
        temperature: 0.9,
        top_p: 0.95,
        ..SamplingParams::default()
    };

    vec![
        ModelDescriptor::new("llama3.2:1b", CapabilityClass::FastResponse, 1_300, 0.55)
            .with_target_latency_ms(3_000),
        ModelDescriptor::new("llama3.2:3b", CapabilityClass::HighQuality, 2_800, 0.70)
            .with_target_latency_ms(6_000),
        ModelDescriptor::new("qwen2.5-coder:7b", CapabilityClass::Code, 5_500, 0.80)
            .with_target_latency_ms(15_000)
            .with_defaults(precise),
        ModelDescriptor::new("llama3.1:8b", CapabilityClass::Analysis, 6_000, 0.85)
            .with_target_latency_ms(20_000),
        ModelDescriptor::new("mistral:7b", CapabilityClass::Creative, 5_000, 0.75)
            .with_target_latency_ms(15_000)
            .with_defaults(loose),
    ]
}

/// Model with the smallest memory footprint
#[must_use]
pub fn smallest(catalog: &[ModelDescriptor]) -> Option<&ModelDescriptor> {
    catalog
        .iter()
        .min_by(|a, b| a.memory_mb.cmp(&b.memory_mb).then_with(|| a.name.cmp(&b.name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest() {
        let catalog = default_catalog();
        assert_eq!(smallest(&catalog).map(|m| m.name.as_str()), Some("llama3.2:1b"));
        assert!(smallest(&[]).is_none());
    }

    #[test]
    fn test_capability_serde_names() {
        let json = serde_json::to_string(&CapabilityClass::FastResponse).unwrap();
        assert_eq!(json, "\"fast-response\"");
    }
}
