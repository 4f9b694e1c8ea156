use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepriseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Episode {episode} is beyond the spoiler cutoff (episode {cutoff})")]
    SpoilerCutoff { episode: u32, cutoff: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No subtitle evidence: {0}")]
    NoEvidence(String),

    #[error("Fact extraction error: {0}")]
    Extraction(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Polish error: {0}")]
    Polish(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RepriseError>;
