//! Opinio Core - batch sentiment classification and upload engine.
//!
//! This crate holds everything between an in-memory dataset of mentions and
//! the two external HTTP APIs it talks to:
//!
//! - **Estimation and batching**: [`estimate_tokens`], [`next_batch_end`]
//! - **Dispatch**: [`CompletionDispatcher`] sends one request per record with
//!   independent retries
//! - **Pipeline**: [`SentimentPipeline`] runs the main pass and the error
//!   reprocessing pass under rate-limit pacing
//! - **Upload**: [`UploadDispatcher`] pushes results to Brandwatch in
//!   concurrent rounds with classified retries
//! - **Progress reporting**: [`ProgressReporter`] receives owned [`PipelineEvent`]s
//!
//! # Architecture
//!
//! No HTTP client lives here. Frontends plug in implementations of
//! [`CompletionClient`] and [`MentionsUploader`] (see `opinio-client`) and a
//! [`TokenCounter`].
//!
//! # Example
//!
//! ```ignore
//! use opinio_core::{ModelRegistry, RunConfig, SentimentPipeline, BpeTokenCounter, TracingReporter};
//!
//! let config = RunConfig::builder("gpt-4o-mini").build(&ModelRegistry::default())?;
//! let counter = BpeTokenCounter::for_config(&config)?;
//! let pipeline = SentimentPipeline::new(client, counter, config);
//! let output = pipeline.run(mentions, &TracingReporter).await?;
//! println!("{} mentions left unclassified", output.summary.residual_errors);
//! ```

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod tokens;
pub mod traits;
pub mod upload;

// Configuration
pub use config::{
    GenerationParams, HttpConfig, ModelEntry, ModelFamily, ModelLimits, ModelRegistry,
    ModelsConfig, PacingConfig, PromptTemplate, RunConfig, RunConfigBuilder, UploadConfig,
    default_config_path, load_models_config,
};

// Error handling
pub use error::{AppError, ProviderErrorDetails, ProviderErrorKind};

// Domain models
pub use models::{Completion, DispatchResult, ExternalRefs, Mention, Sentiment};

// Estimation and batching
pub use batch::{next_batch_end, partition};
pub use tokens::{BpeTokenCounter, TokenCounter, TokenEstimate, estimate_tokens};

// Retry
pub use retry::{Backoff, RetryPolicy};

// Progress reporting
pub use progress::{
    ChannelReporter, Phase, PipelineEvent, ProgressPlan, ProgressRange, ProgressReporter,
    SilentReporter, TracingReporter,
};

// Traits for dependency injection
pub use traits::{CompletionClient, CompletionRequest, MentionsUploader, ModelBackend};

// Services
pub use dispatch::CompletionDispatcher;
pub use pipeline::{PassStats, RunOutput, RunSummary, SentimentPipeline};
pub use upload::{
    ChunkOutcome, PreparedUpload, UploadDispatcher, UploadRecord, UploadResponse, UploadSummary,
    classify_response, prepare_upload,
};
