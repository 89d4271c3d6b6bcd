//! Opinio Client - HTTP clients for external APIs
//!
//! This crate provides the network side of the engine:
//!
//! - [`openai`], [`gemini`], [`deepseek`] - completion backends (wire formats)
//! - [`http`] - [`HttpCompletionClient`], one POST per completion request
//! - [`provider`] - runtime backend selection from the model family
//! - [`brandwatch`] - mentions upload endpoint
//!
//! # Overview
//!
//! Backends are pure encoders and decoders; the HTTP client performs the
//! request and hands status and body back to them. Retries, pacing and
//! batching all live in `opinio-core`.

pub mod brandwatch;
pub mod deepseek;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod provider;

// Re-export main client types
pub use brandwatch::BrandwatchClient;
pub use deepseek::DeepSeekBackend;
pub use gemini::GeminiBackend;
pub use http::HttpCompletionClient;
pub use openai::OpenAiBackend;
pub use provider::{ApiKeys, ModelBackendEnum, completion_client};
