//! Structured error types for the webhook ingress.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::mail::MailError;

#[derive(Debug, Error)]
pub enum HookError {
  #[error("malformed payload: {0}")]
  Malformed(String),

  #[error("no resources found")]
  NoResources,

  #[error("process image error: {0}")]
  Extraction(#[source] ExtractError),

  #[error("send mail error: {0}")]
  Notification(#[source] MailError),
}

impl HookError {
  /// Response field naming the failing stage.
  fn field(&self) -> &'static str {
    match self {
      Self::Malformed(_) | Self::NoResources => "error",
      Self::Extraction(_) => "image_error",
      Self::Notification(_) => "mail_error",
    }
  }

  fn status(&self) -> StatusCode {
    match self {
      Self::Malformed(_) | Self::NoResources => StatusCode::BAD_REQUEST,
      Self::Extraction(_) | Self::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for HookError {
  fn into_response(self) -> Response {
    let message = match &self {
      Self::Extraction(e) => e.to_string(),
      Self::Notification(e) => e.to_string(),
      other => other.to_string(),
    };
    (self.status(), Json(json!({ self.field(): message }))).into_response()
  }
}

/// Errors of the background loops.
#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error("cron expression {expr:?}: {reason}")]
  Cron { expr: String, reason: String },
}
