//! Inference Backend Abstraction
//!
//! The gateway treats the inference server as a black box reachable over
//! RPC: generate text for a model, and list the models it serves.
//!
//! # Available Backends
//!
//! - [`OllamaBackend`]: Ollama REST API (`/api/generate`, `/api/tags`)

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{BackendError, Generation, GenerationRequest, InferenceBackend};
