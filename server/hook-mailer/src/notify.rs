//! Canned notifications: the per-build report and the scheduled alerts.

use std::sync::Arc;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::{ConfigError, EmailConfig};
use crate::extract::Artifacts;
use crate::mail::{BodyType, Mail, MailError, Mailer};
use hook_stats::AppRecord;

/// Build outcome read from the report body's result marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
  Succeeded,
  Failed,
  Unknown,
}

impl BuildResult {
  /// First match of `pattern` decides; its first capture group must read
  /// `SUCCESS` or `FAILURE`.
  pub fn detect(pattern: &Regex, body: &str) -> Self {
    let marker = pattern
      .captures(body)
      .and_then(|caps| caps.get(1))
      .map(|m| m.as_str());
    match marker {
      Some("SUCCESS") => Self::Succeeded,
      Some("FAILURE") => Self::Failed,
      _ => Self::Unknown,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
      Self::Unknown => "unknown",
    }
  }
}

/// Which scheduled mail, if any, an app's daily counters call for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
  NoBuild,
  BuildWithErrors,
  BuildSucceeded,
}

impl Alert {
  /// `calls == 0` → no build; `errors > 0` → errors; otherwise a success
  /// notice only when `notify_success` is set.
  pub fn for_record(record: &AppRecord, notify_success: bool) -> Option<Self> {
    if record.calls == 0 {
      Some(Self::NoBuild)
    } else if record.errors > 0 {
      Some(Self::BuildWithErrors)
    } else if notify_success {
      Some(Self::BuildSucceeded)
    } else {
      None
    }
  }
}

/// Turns build events and alerts into mails for the configured recipients.
pub struct Notifier {
  mailer: Arc<dyn Mailer>,
  to: Vec<String>,
  cc: Vec<String>,
  body_type: BodyType,
  subject: String,
  result_pattern: Regex,
}

impl Notifier {
  pub fn new(mailer: Arc<dyn Mailer>, email: &EmailConfig) -> Result<Self, ConfigError> {
    Ok(Self {
      mailer,
      to: email.receiver.clone(),
      cc: email.cc.clone(),
      body_type: email.body.body_type()?,
      subject: email.body.subject.clone(),
      result_pattern: email.body.result_regex()?,
    })
  }

  /// Mail the report extracted from a freshly pushed build image.
  pub async fn build_report(
    &self,
    app: &str,
    artifacts: &Artifacts,
    today: NaiveDate,
  ) -> Result<BuildResult, MailError> {
    let body = tokio::fs::read_to_string(&artifacts.mail_body)
      .await
      .map_err(|source| MailError::Io {
        path: artifacts.mail_body.clone(),
        source,
      })?;
    let result = BuildResult::detect(&self.result_pattern, &body);
    let subject = self
      .subject
      .replace("{app}", app)
      .replace("{date}", &today.format("%Y-%m-%d").to_string())
      .replace("{result}", result.as_str());

    self
      .mailer
      .send(Mail {
        to: self.to.clone(),
        cc: self.cc.clone(),
        subject,
        body,
        body_type: self.body_type,
        attachments: artifacts.attachments.clone(),
      })
      .await?;
    info!(app, result = result.as_str(), "build report sent");
    Ok(result)
  }

  pub async fn alert(&self, alert: Alert, app: &str, today: NaiveDate) -> Result<(), MailError> {
    match alert {
      Alert::NoBuild => self.no_build(app, today).await,
      Alert::BuildWithErrors => self.build_with_errors(app, today).await,
      Alert::BuildSucceeded => self.build_succeeded(app, today).await,
    }
  }

  pub async fn no_build(&self, app: &str, today: NaiveDate) -> Result<(), MailError> {
    let subject = format!(
      "Scheduled build alert - {}: no successful build received for {}",
      today.format("%Y-%m-%d"),
      app
    );
    self
      .canned(
        subject,
        "Check the earlier scheduled notices and today's first build report, then the build environment logs.",
      )
      .await
  }

  pub async fn build_with_errors(&self, app: &str, today: NaiveDate) -> Result<(), MailError> {
    let subject = format!(
      "Scheduled build warning - {}: {} built but reported errors",
      today.format("%Y-%m-%d"),
      app
    );
    self.canned(subject, "").await
  }

  pub async fn build_succeeded(&self, app: &str, today: NaiveDate) -> Result<(), MailError> {
    let subject = format!(
      "Scheduled build notice - {}: {} built successfully",
      today.format("%Y-%m-%d"),
      app
    );
    self
      .canned(subject, "See the build environment logs for details.")
      .await
  }

  async fn canned(&self, subject: String, body: &str) -> Result<(), MailError> {
    self
      .mailer
      .send(Mail {
        to: self.to.clone(),
        cc: Vec::new(),
        subject,
        body: body.to_string(),
        body_type: BodyType::Text,
        attachments: Vec::new(),
      })
      .await
  }
}
