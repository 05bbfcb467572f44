use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The provider answered (possibly with HTTP 200) but flagged the request as failed.
    #[error("Provider error (HTTP {status}): {detail}")]
    Provider { status: u16, detail: String },

    #[error("Game {0} not found at provider")]
    NotFound(i64),

    #[error("Malformed snapshot: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Store failures abort the current tick; everything else is scoped to one game.
    pub fn is_store(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Migration(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
