use std::path::PathBuf;

use clap::{Args, Parser};

use crate::service::GenerationParams;

#[derive(Parser, Debug)]
#[command(
    name = "form-classifier",
    version,
    about = "Classify PDF forms with Gemini and verify them against expected form metadata"
)]
pub struct Cli {
    #[command(flatten)]
    pub classify: ClassifyArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    /// Folder containing the PDF forms (not searched recursively)
    pub folder: PathBuf,

    /// JSON array of expected forms
    #[arg(default_value = "form_config.json")]
    pub config: PathBuf,

    /// Destination of this run's structured results
    #[arg(default_value = "classification_results.json")]
    pub output: PathBuf,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Cumulative HTML statistics file, merged with earlier runs
    #[arg(long = "stats", default_value = "classification_stats.html")]
    pub stats: PathBuf,

    #[arg(long, default_value = "gemini-2.5-flash-lite")]
    pub model: String,

    #[arg(
        long,
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub endpoint: String,

    #[arg(long, default_value_t = 0.0)]
    pub temperature: f32,

    #[arg(long, default_value_t = 0.95)]
    pub top_p: f32,

    #[arg(long, default_value_t = 10)]
    pub top_k: u32,

    #[arg(long, default_value_t = 2048)]
    pub max_output_tokens: u32,
}

impl ClassifyArgs {
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_output_tokens: self.max_output_tokens,
            candidate_count: 1,
        }
    }
}
