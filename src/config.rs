use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, RepriseError};

// Default values for pipeline tuning
fn default_chunk_duration_secs() -> f64 {
    600.0
}

fn default_cast_limit() -> usize {
    50
}

fn default_prompt_version() -> String {
    "v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub local_model: LocalModelConfig,
    pub polish: PolishConfig,
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// Local LLM model used for extraction and synthesis
    pub model: String,
    /// Request timeout in seconds for extraction calls
    pub extract_timeout_secs: u64,
    /// Request timeout in seconds for the larger synthesis calls
    pub synthesis_timeout_secs: u64,
    /// Minimum gap between model requests in milliseconds (0 = no pacing)
    pub min_request_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolishConfig {
    /// Whether season recaps may escalate to a cloud model at all
    pub enabled: bool,
    /// OpenAI-compatible endpoint URL
    pub endpoint: String,
    /// Model used for mid-tier escalation (score 4-6)
    pub mid_model: String,
    /// Model used for top-tier escalation (score 7-10)
    pub top_model: String,
    /// Environment variable holding the API key, resolved per call
    pub api_key_env: String,
    /// Request timeout in seconds for polish calls
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Target chunk duration in seconds of in-show dialogue time
    #[serde(default = "default_chunk_duration_secs")]
    pub chunk_duration_secs: f64,
    /// Maximum number of cast names supplied to prompts (top billing first)
    #[serde(default = "default_cast_limit")]
    pub cast_limit: usize,
    /// Prompt version, part of every cache key
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_model: LocalModelConfig {
                endpoint: "http://localhost:11434".to_string(),
                model: "llama3.2:3b".to_string(),
                extract_timeout_secs: 60,
                synthesis_timeout_secs: 120,
                min_request_interval_ms: 0,
            },
            polish: PolishConfig {
                enabled: true,
                endpoint: "https://api.openai.com".to_string(),
                mid_model: "gpt-4o-mini".to_string(),
                top_model: "gpt-4o".to_string(),
                api_key_env: "REPRISE_POLISH_API_KEY".to_string(),
                timeout_secs: 120,
            },
            pipeline: PipelineConfig {
                chunk_duration_secs: default_chunk_duration_secs(),
                cast_limit: default_cast_limit(),
                prompt_version: default_prompt_version(),
            },
            database: DatabaseConfig {
                path: ".reprise/reprise.db".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RepriseError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| RepriseError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RepriseError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RepriseError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
