//! Error types for tipbot

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Invalid callback payload: {0}")]
    InvalidCallback(String),

    #[error("Payment already requested for plan: {0}")]
    AlreadyRequested(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Relay client error: {0}")]
    Relay(String),

    #[error("Startup failed: {0}")]
    FatalInit(String),
}

pub type Result<T> = std::result::Result<T, Error>;
