//! In-memory doubles for the mail and extraction seams.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::extract::{Artifacts, ExtractError, ExtractRequest, ImageExtractor};
use crate::mail::{Mail, MailError, Mailer};

/// Records every mail; fails those whose subject contains `fail_on`.
#[derive(Default)]
pub struct RecordingMailer {
  sent: Mutex<Vec<Mail>>,
  fail_on: Option<String>,
}

impl RecordingMailer {
  pub fn failing_on(needle: &str) -> Self {
    Self {
      sent: Mutex::new(Vec::new()),
      fail_on: Some(needle.to_string()),
    }
  }

  pub fn sent(&self) -> Vec<Mail> {
    self.sent.lock().clone()
  }
}

#[async_trait]
impl Mailer for RecordingMailer {
  async fn send(&self, mail: Mail) -> Result<(), MailError> {
    if let Some(needle) = &self.fail_on {
      if mail.subject.contains(needle.as_str()) {
        return Err(MailError::Io {
          path: PathBuf::from("smtp"),
          source: std::io::Error::other("connection refused"),
        });
      }
    }
    self.sent.lock().push(mail);
    Ok(())
  }
}

/// Hands out fixed artifacts, or fails every call.
pub struct ScriptedExtractor {
  artifacts: Option<Artifacts>,
  calls: AtomicUsize,
}

impl ScriptedExtractor {
  pub fn returning(artifacts: Artifacts) -> Self {
    Self {
      artifacts: Some(artifacts),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn failing() -> Self {
    Self {
      artifacts: None,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ImageExtractor for ScriptedExtractor {
  async fn extract(&self, _req: &ExtractRequest<'_>) -> Result<Artifacts, ExtractError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.artifacts.clone().ok_or(ExtractError::Command {
      step: "pull",
      status: "exit status: 1".into(),
      stderr: "manifest unknown".into(),
    })
  }
}
