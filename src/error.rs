//! # Error Types
//!
//! A single error enum covering every failure class the host surfaces, with an
//! `IntoResponse` impl that maps each to an HTTP status and a structured JSON body
//! so axum handlers can simply return `Result<T, PluginHostError>`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginHostError {
    /// A plugin's `plugin.lua` failed to parse or raised during its top-level run.
    #[error("plugin load failed: {message}")]
    PluginLoad { message: String },

    /// A handler invoked through `query` failed.
    #[error("hook call failed: {message}")]
    HookCall { message: String },

    /// A `query` chain exceeded the recursion bound.
    #[error("recursion limit exceeded")]
    RecursionLimit,

    /// No registration exists for the requested hook name.
    #[error("no handler registered for hook '{0}'")]
    NoSuchHook(String),

    /// The plugin's database could not be opened or the statement failed.
    #[error("database error: {message}")]
    Database { message: String },

    /// `config.toml` could not be read or failed validation.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The request body exceeded `server.max_body_size`.
    #[error("request body too large")]
    PayloadTooLarge,

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for PluginHostError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            PluginHostError::PluginLoad { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "plugin_load_error")
            }
            PluginHostError::HookCall { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "hook_error"),
            PluginHostError::RecursionLimit => {
                (StatusCode::INTERNAL_SERVER_ERROR, "recursion_limit")
            }
            PluginHostError::NoSuchHook(_) => (StatusCode::NOT_FOUND, "no_such_hook"),
            PluginHostError::Database { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
            PluginHostError::Config { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            PluginHostError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
            }
            PluginHostError::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            PluginHostError::Json(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            PluginHostError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
