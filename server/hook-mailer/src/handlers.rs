//! HTTP handlers for the build-hook ingress.

use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use hook_stats::{locator, token, Verdict, WebhookPayload};

use crate::error::HookError;
use crate::extract::ExtractRequest;
use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HookResponse {
  pub status: &'static str,
}

impl HookResponse {
  const SUCCESS: Self = Self { status: "success" };
  const IGNORED: Self = Self { status: "ignored" };
}

pub async fn health() -> &'static str {
  "ok"
}

/// One registry delivery: count it, filter replays, then extract and mail the
/// build report.
pub async fn hook(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<HookResponse>, HookError> {
  let payload: WebhookPayload =
    serde_json::from_slice(&body).map_err(|e| HookError::Malformed(e.to_string()))?;
  let resource = payload
    .event_data
    .resources
    .first()
    .ok_or(HookError::NoResources)?;

  let image = resource.resource_url.as_str();
  let loc = match locator::parse(image) {
    Some(loc) if locator::is_build_hook(image, &state.marker) => loc,
    _ => {
      debug!(locator = image, kind = %payload.kind, "not a build-hook image, ignored");
      return Ok(Json(HookResponse::IGNORED));
    }
  };
  let app = loc.app;
  let calls = state.registry.add_calls(app, 1);

  let tag = if resource.tag.is_empty() {
    loc.tag.unwrap_or_default()
  } else {
    resource.tag.as_str()
  };
  let sign = token::sign(&payload.event_data);
  let create_time = token::create_time_from_tag(tag, &state.clock.now());

  match state.registry.admit(app, &sign, &create_time) {
    Verdict::Duplicate => {
      info!(app, tag, calls, "duplicate delivery, skipped");
      return Ok(Json(HookResponse::SUCCESS));
    }
    Verdict::Stale => {
      info!(app, tag, create_time = %create_time, "older than last accepted build, skipped");
      return Ok(Json(HookResponse::SUCCESS));
    }
    Verdict::Accept => {
      info!(app, tag, operator = %payload.operator, "build accepted");
    }
  }

  let req = ExtractRequest {
    namespace: &payload.event_data.repository.namespace,
    app,
    tag,
    image,
  };
  let artifacts = match state.extractor.extract(&req).await {
    Ok(artifacts) => artifacts,
    Err(e) => {
      let errors = state.registry.add_errors(app, 1);
      error!(app, tag, errors, error = %e, "image extraction failed");
      return Err(HookError::Extraction(e));
    }
  };

  if let Err(e) = state
    .notifier
    .build_report(app, &artifacts, state.clock.today())
    .await
  {
    let errors = state.registry.add_errors(app, 1);
    warn!(app, tag, errors, error = %e, "build report mail failed");
    return Err(HookError::Notification(e));
  }

  Ok(Json(HookResponse::SUCCESS))
}
