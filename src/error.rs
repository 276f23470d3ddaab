use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Place index artifact is missing or corrupt. Fatal for the run.
    #[error("place index unavailable: {0}")]
    IndexUnavailable(String),

    /// Query text was empty after normalization.
    #[error("empty query")]
    EmptyQuery,

    /// Inference produced no location candidates for a market. Non-fatal.
    #[error("no location candidates")]
    NoCandidates,

    /// External geocoder failed or returned no match. The candidate is kept
    /// ungeocoded and never treated as fatal.
    #[error("geocode unresolved for '{0}'")]
    GeocodeUnresolved(String),

    /// External call exceeded its deadline. Treated as a cache miss.
    #[error("external call timed out: {0}")]
    ExternalTimeout(String),

    /// Data failed validation before persistence (e.g. confidence out of [0,1]).
    #[error("validation error: {0}")]
    Validation(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion error: {0}")]
    Ingest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Per-market errors are counted and skipped; only infrastructure
    /// failures abort the whole pipeline run.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            AppError::IndexUnavailable(_) | AppError::Database(_) | AppError::Migration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NoCandidates | AppError::EmptyQuery => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
