//! Configuration types for Opinio components.
//!
//! A [`RunConfig`] is built once per run from a model identifier and a
//! [`ModelRegistry`]; everything derived from the model (backend family,
//! token and request budgets) is resolved at build time and never changes
//! while the run is in progress.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::retry::RetryPolicy;

// =============================================================================
// Model Families
// =============================================================================

/// Completion backend family.
///
/// Determines the wire format used to talk to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// OpenAI chat completions.
    OpenAI,
    /// Google Gemini `generateContent`.
    Gemini,
    /// DeepSeek chat completions.
    DeepSeek,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
            Self::DeepSeek => write!(f, "deepseek"),
        }
    }
}

impl FromStr for ModelFamily {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "deepseek" => Ok(Self::DeepSeek),
            _ => Err(AppError::ConfigError(format!(
                "Unknown model family: '{}'. Valid options: openai, gemini, deepseek",
                s
            ))),
        }
    }
}

// =============================================================================
// Model Registry (models.toml)
// =============================================================================

/// Per-window budgets for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    /// Maximum prompt tokens dispatched per rate-limit window.
    pub token_budget: usize,
    /// Maximum requests dispatched per rate-limit window.
    pub request_budget: usize,
}

/// A single model entry in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub family: ModelFamily,
    pub token_budget: usize,
    pub request_budget: usize,
}

impl ModelEntry {
    pub fn limits(&self) -> ModelLimits {
        ModelLimits {
            token_budget: self.token_budget,
            request_budget: self.request_budget,
        }
    }
}

/// Root configuration structure for models.toml.
///
/// ```toml
/// [[models]]
/// name = "gpt-4o-mini"
/// family = "openai"
/// token_budget = 5000000
/// request_budget = 5000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

/// Lookup table from model identifier to family and budgets.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    entries: BTreeMap<String, ModelEntry>,
}

const BUILTIN_MODELS: &[(&str, ModelFamily, usize, usize)] = &[
    ("gpt-3.5-turbo", ModelFamily::OpenAI, 5_000_000, 5_000),
    ("gpt-4o", ModelFamily::OpenAI, 1_000_000, 5_000),
    ("gpt-4o-mini", ModelFamily::OpenAI, 5_000_000, 5_000),
    ("gemini-1.5-flash", ModelFamily::Gemini, 4_000_000, 2_000),
    ("gemini-2.0-flash", ModelFamily::Gemini, 4_000_000, 2_000),
    ("deepseek-chat", ModelFamily::DeepSeek, 1_000_000, 1_000),
];

impl Default for ModelRegistry {
    fn default() -> Self {
        let entries = BUILTIN_MODELS
            .iter()
            .map(|&(name, family, token_budget, request_budget)| {
                (
                    name.to_string(),
                    ModelEntry {
                        name: name.to_string(),
                        family,
                        token_budget,
                        request_budget,
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

impl ModelRegistry {
    /// An empty registry, without the built-in models.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Built-in models overlaid with the entries of a loaded file.
    pub fn with_overrides(config: ModelsConfig) -> Self {
        let mut registry = Self::default();
        for entry in config.models {
            registry.insert(entry);
        }
        registry
    }

    pub fn insert(&mut self, entry: ModelEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Finds a model by exact identifier.
    pub fn resolve(&self, model: &str) -> Result<&ModelEntry, AppError> {
        self.entries
            .get(model)
            .ok_or_else(|| AppError::UnsupportedModel(model.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.values()
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "models.toml";

/// Returns the default configuration directory path: `~/.config/opinio/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("opinio"))
}

/// Returns the default configuration file path: `~/.config/opinio/models.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Opinio model configuration
#
# Entries here are added to the built-in models (gpt-3.5-turbo, gpt-4o,
# gpt-4o-mini, gemini-1.5-flash, gemini-2.0-flash, deepseek-chat) and
# override a built-in entry with the same name.
#
# token_budget and request_budget apply to each rate-limit window.
#
# [[models]]
# name = "gpt-4.1-mini"
# family = "openai"
# token_budget = 2000000
# request_budget = 5000

models = []
"#;

/// Load the model table from a TOML file.
///
/// * `Ok(Some(config))` - file loaded
/// * `Ok(None)` - no default path available, or the template could not be written
/// * `Err(e)` - the file is unreadable or invalid, or an explicit path does not exist
///
/// A missing file at the default path is replaced by a commented template.
pub fn load_models_config(path: Option<PathBuf>) -> Result<Option<ModelsConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            if let Err(e) = create_default_config(&config_path) {
                tracing::warn!("Could not create default config template: {}", e);
                return Ok(None);
            }
        } else {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: ModelsConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    for entry in &config.models {
        if entry.token_budget == 0 || entry.request_budget == 0 {
            return Err(AppError::ConfigError(format!(
                "Model '{}' in '{}' has a zero budget",
                entry.name,
                config_path.display()
            )));
        }
    }

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}

// =============================================================================
// Prompt Templates
// =============================================================================

/// Placeholder replaced by ` toward <company>` in per-record company prompts.
pub const COMPANY_PLACEHOLDER: &str = "{toward_company}";

const SENTIMENT_SYSTEM_PROMPT: &str =
    "Classify the sentiment of the following Text{toward_company} in one word from this list [Positive, Neutral, Negative].";
const DEFAULT_USER_PREFIX: &str = "Text:";
const DEFAULT_USER_SUFFIX: &str = "Sentiment:";

/// System and user prompt pieces sent with every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system: String,
    pub user_prefix: String,
    pub user_suffix: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::sentiment()
    }
}

impl PromptTemplate {
    /// Plain three-class sentiment prompt.
    pub fn sentiment() -> Self {
        Self::custom(
            SENTIMENT_SYSTEM_PROMPT.replace(COMPANY_PLACEHOLDER, ""),
            DEFAULT_USER_PREFIX,
            DEFAULT_USER_SUFFIX,
        )
    }

    /// Sentiment toward one company, the same for every record.
    pub fn toward_company(company: &str) -> Self {
        Self::custom(
            SENTIMENT_SYSTEM_PROMPT.replace(COMPANY_PLACEHOLDER, &format!(" toward {}", company)),
            DEFAULT_USER_PREFIX,
            DEFAULT_USER_SUFFIX,
        )
    }

    /// Sentiment toward each record's own `analyzed_company`.
    pub fn per_record_company() -> Self {
        Self::custom(SENTIMENT_SYSTEM_PROMPT, DEFAULT_USER_PREFIX, DEFAULT_USER_SUFFIX)
    }

    pub fn custom(
        system: impl Into<String>,
        user_prefix: impl Into<String>,
        user_suffix: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            user_prefix: user_prefix.into(),
            user_suffix: user_suffix.into(),
        }
    }

    pub fn uses_company_placeholder(&self) -> bool {
        self.system.contains(COMPANY_PLACEHOLDER)
    }

    /// System prompt for one record.
    pub fn system_prompt(&self, company: Option<&str>) -> String {
        if !self.uses_company_placeholder() {
            return self.system.clone();
        }
        let clause = match company.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => format!(" toward {}", c),
            None => String::new(),
        };
        self.system.replace(COMPANY_PLACEHOLDER, &clause)
    }

    /// User message wrapping the record text.
    pub fn user_prompt(&self, text: &str) -> String {
        format!("{} \"{}\"\n{}", self.user_prefix, text, self.user_suffix)
    }
}

// =============================================================================
// Run Configuration
// =============================================================================

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub logprobs: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 1,
            logprobs: false,
        }
    }
}

/// HTTP client configuration for external API calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout. A timed out request counts as a transient failure.
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Rate-limit pacing between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Minimum time between the dispatch starts of two consecutive batches.
    pub batch_cooldown: Duration,
    /// Pause before the error reprocessing pass.
    pub reprocess_cooldown: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            batch_cooldown: Duration::from_secs(30),
            reprocess_cooldown: Duration::from_secs(35),
        }
    }
}

impl PacingConfig {
    /// No waiting at all. Useful for tests and local mocks.
    pub fn none() -> Self {
        Self {
            batch_cooldown: Duration::ZERO,
            reprocess_cooldown: Duration::ZERO,
        }
    }
}

/// Immutable configuration for one classification run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: String,
    pub family: ModelFamily,
    pub limits: ModelLimits,
    pub prompt: PromptTemplate,
    pub generation: GenerationParams,
    /// Whether an upload phase follows; shifts the progress ranges.
    pub upload: bool,
    pub http: HttpConfig,
    pub completion_retry: RetryPolicy,
    pub pacing: PacingConfig,
}

impl RunConfig {
    pub fn builder(model: impl Into<String>) -> RunConfigBuilder {
        RunConfigBuilder::new(model)
    }
}

/// Builder for [`RunConfig`].
///
/// ```
/// use opinio_core::{ModelRegistry, RunConfig};
///
/// let config = RunConfig::builder("gpt-4o-mini")
///     .with_logprobs(true)
///     .build(&ModelRegistry::default())
///     .unwrap();
/// assert_eq!(config.limits.request_budget, 5_000);
/// ```
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    model: String,
    prompt: PromptTemplate,
    generation: GenerationParams,
    upload: bool,
    http: HttpConfig,
    completion_retry: RetryPolicy,
    pacing: PacingConfig,
    limits_override: Option<ModelLimits>,
}

impl RunConfigBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: PromptTemplate::default(),
            generation: GenerationParams::default(),
            upload: false,
            http: HttpConfig::default(),
            completion_retry: RetryPolicy::completion(),
            pacing: PacingConfig::default(),
            limits_override: None,
        }
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.generation.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.generation.max_output_tokens = max_output_tokens.max(1);
        self
    }

    pub fn with_logprobs(mut self, logprobs: bool) -> Self {
        self.generation.logprobs = logprobs;
        self
    }

    pub fn with_upload(mut self, upload: bool) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http.timeout = timeout;
        self
    }

    pub fn with_completion_retry(mut self, policy: RetryPolicy) -> Self {
        self.completion_retry = policy;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// Replaces the registry budgets for this run.
    pub fn with_limits(mut self, limits: ModelLimits) -> Self {
        self.limits_override = Some(limits);
        self
    }

    /// Resolves the model and freezes the configuration.
    pub fn build(self, registry: &ModelRegistry) -> Result<RunConfig, AppError> {
        let entry = registry.resolve(&self.model)?;
        let limits = self.limits_override.unwrap_or_else(|| entry.limits());
        if limits.token_budget == 0 || limits.request_budget == 0 {
            return Err(AppError::ConfigError(format!(
                "Model '{}' has a zero token or request budget",
                self.model
            )));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(AppError::ConfigError(format!(
                "Temperature must be between 0 and 2, got {}",
                self.generation.temperature
            )));
        }

        Ok(RunConfig {
            family: entry.family,
            model: self.model,
            limits,
            prompt: self.prompt,
            generation: self.generation,
            upload: self.upload,
            http: self.http,
            completion_retry: self.completion_retry,
            pacing: self.pacing,
        })
    }
}

// =============================================================================
// Upload Configuration
// =============================================================================

/// Settings for pushing classified mentions to Brandwatch.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Records per PATCH request (platform cap).
    pub chunk_size: usize,
    /// Chunks in flight per round.
    pub max_concurrent_chunks: usize,
    /// Backoff after rate-limited rounds; `max_attempts` bounds consecutive
    /// rounds without a single successful chunk.
    pub retry: RetryPolicy,
    /// Pause before retrying a round that saw only transient failures.
    pub transient_pause: Duration,
    /// API error code reported for server-side timeouts.
    pub timeout_error_code: i64,
    /// API error code reported for duplicate tags, when known.
    pub duplicate_tag_error_code: Option<i64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1360,
            max_concurrent_chunks: 5,
            retry: RetryPolicy::upload(),
            transient_pause: Duration::from_secs(5),
            timeout_error_code: 100,
            duplicate_tag_error_code: None,
        }
    }
}

impl UploadConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn with_max_concurrent_chunks(mut self, n: usize) -> Self {
        self.max_concurrent_chunks = n.max(1);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_transient_pause(mut self, pause: Duration) -> Self {
        self.transient_pause = pause;
        self
    }

    pub fn with_duplicate_tag_error_code(mut self, code: i64) -> Self {
        self.duplicate_tag_error_code = Some(code);
        self
    }
}
