use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use opinio_client::ApiKeys;
use opinio_core::PromptTemplate;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown");
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "opinio")]
#[command(
    author,
    version = version_info(),
    about = "Batch sentiment classification with LLMs, with optional Brandwatch upload"
)]
#[command(after_help = "Examples:
  opinio analyze mentions.csv --model gpt-4o-mini
  opinio analyze mentions.csv --company \"Acme Corp\" --logprobs -o scored.csv
  opinio analyze mentions.csv --model gemini-2.0-flash --upload
  opinio upload scored.csv
  opinio models

Model families:
  gpt-*       OpenAI   (OPENAI_API_KEY)
  gemini-*    Gemini   (GEMINI_API_KEY)
  deepseek-*  DeepSeek (DEEPSEEK_API_KEY)")]
pub struct Config {
    /// OpenAI API key (required for OpenAI models)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Google Gemini API key (required for Gemini models)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// DeepSeek API key (required for DeepSeek models)
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub deepseek_api_key: Option<String>,

    /// Brandwatch API token (required for upload)
    #[arg(long, env = "BRANDWATCH_API_TOKEN", hide_env_values = true)]
    pub brandwatch_api_token: Option<String>,

    /// Brandwatch project the mentions belong to (required for upload)
    #[arg(long, env = "BRANDWATCH_PROJECT_ID")]
    pub brandwatch_project_id: Option<String>,

    /// Custom path to models.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub models_config: Option<PathBuf>,

    /// Log debug output (per-request and per-chunk detail)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    pub fn api_keys(&self) -> ApiKeys {
        ApiKeys {
            openai: self.openai_api_key.clone(),
            gemini: self.gemini_api_key.clone(),
            deepseek: self.deepseek_api_key.clone(),
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify every mention of a CSV file and write the results
    #[command(after_help = "The input needs a 'Full Text' or 'Content' column. Metadata rows above
the header (as in Brandwatch exports) are skipped.

Optional columns:
  Query Id, Resource Id   required with --upload
  Date                    sent on upload
  AnalyzedCompany         used with --per-record-company
  BW_Tags                 comma-separated tags added on upload")]
    Analyze(AnalyzeArgs),
    /// Upload an already classified CSV file to Brandwatch
    #[command(after_help = "Example: opinio upload scored.csv")]
    Upload {
        /// CSV file with Sentiment, Query Id and Resource Id columns
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// List the supported models and their rate-limit budgets
    Models,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// CSV file with the mentions to classify
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Output CSV path (defaults to <input>_sentiment.csv)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Model identifier, as listed by `opinio models`
    #[arg(short, long, default_value = "gpt-4o-mini")]
    pub model: String,

    /// Measure sentiment toward this company
    #[arg(long, conflicts_with = "per_record_company")]
    pub company: Option<String>,

    /// Measure sentiment toward each row's AnalyzedCompany
    #[arg(long)]
    pub per_record_company: bool,

    /// Replace the system prompt ({toward_company} is substituted per record)
    #[arg(long, conflicts_with = "company")]
    pub system_prompt: Option<String>,

    /// Text placed before the quoted mention in the user message
    #[arg(long)]
    pub user_prompt: Option<String>,

    /// Text placed after the quoted mention in the user message
    #[arg(long)]
    pub user_prompt_suffix: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(long, default_value_t = 0.3)]
    pub temperature: f64,

    /// Output token limit per request
    #[arg(long, default_value_t = 1)]
    pub max_output_tokens: u32,

    /// Request log-probabilities and write a Probs column
    #[arg(long)]
    pub logprobs: bool,

    /// Upload the results to Brandwatch after classification
    #[arg(long)]
    pub upload: bool,
}

impl AnalyzeArgs {
    /// Prompt template selected by the flags.
    pub fn prompt(&self) -> PromptTemplate {
        let base = if let Some(system) = &self.system_prompt {
            let defaults = PromptTemplate::sentiment();
            PromptTemplate::custom(system.clone(), defaults.user_prefix, defaults.user_suffix)
        } else if let Some(company) = &self.company {
            PromptTemplate::toward_company(company)
        } else if self.per_record_company {
            PromptTemplate::per_record_company()
        } else {
            PromptTemplate::sentiment()
        };

        PromptTemplate {
            user_prefix: self.user_prompt.clone().unwrap_or(base.user_prefix),
            user_suffix: self.user_prompt_suffix.clone().unwrap_or(base.user_suffix),
            system: base.system,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => default_output_path(&self.input),
        }
    }
}

/// `data/mentions.csv` -> `data/mentions_sentiment.csv`
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}_sentiment.csv", stem))
}
