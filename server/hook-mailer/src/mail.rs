//! Outbound mail: the `Mailer` seam and its SMTP implementation.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EmailConfig;

const SMTPS_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum MailError {
  #[error("mail address: {0}")]
  Address(#[from] lettre::address::AddressError),

  #[error("mail build: {0}")]
  Build(#[from] lettre::error::Error),

  #[error("smtp: {0}")]
  Smtp(#[from] lettre::transport::smtp::Error),

  #[error("mail io: {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("attachment content type: {0}")]
  ContentType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
  Html,
  Text,
}

impl BodyType {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "html" => Some(Self::Html),
      "text" | "plain" => Some(Self::Text),
      _ => None,
    }
  }

  fn content_type(self) -> ContentType {
    match self {
      Self::Html => ContentType::TEXT_HTML,
      Self::Text => ContentType::TEXT_PLAIN,
    }
  }
}

/// One message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
  pub to: Vec<String>,
  pub cc: Vec<String>,
  pub subject: String,
  pub body: String,
  pub body_type: BodyType,
  pub attachments: Vec<PathBuf>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
  async fn send(&self, mail: Mail) -> Result<(), MailError>;
}

/// SMTP delivery through lettre, with a fixed number of attempts.
pub struct SmtpMailer {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  from: Mailbox,
  attempts: u32,
  backoff: Duration,
}

impl SmtpMailer {
  /// Implicit TLS on port 465, STARTTLS elsewhere.
  pub fn from_config(email: &EmailConfig) -> Result<Self, MailError> {
    let from: Mailbox = email.sender.address.parse()?;
    let builder = if email.port == SMTPS_PORT {
      AsyncSmtpTransport::<Tokio1Executor>::relay(&email.server)?
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&email.server)?
    };
    let mut builder = builder.port(email.port);
    if !email.sender.password.is_empty() {
      builder = builder.credentials(Credentials::new(
        email.sender.address.clone(),
        email.sender.password.clone(),
      ));
    }

    Ok(Self {
      transport: builder.build(),
      from,
      attempts: 3,
      backoff: Duration::from_secs(2),
    })
  }

  async fn build_message(&self, mail: &Mail) -> Result<Message, MailError> {
    let mut builder = Message::builder()
      .from(self.from.clone())
      .subject(mail.subject.clone());
    for to in &mail.to {
      builder = builder.to(to.parse()?);
    }
    for cc in &mail.cc {
      builder = builder.cc(cc.parse()?);
    }

    let body = SinglePart::builder()
      .header(mail.body_type.content_type())
      .body(mail.body.clone());
    if mail.attachments.is_empty() {
      return Ok(builder.singlepart(body)?);
    }

    let octet_stream = ContentType::parse("application/octet-stream")
      .map_err(|e| MailError::ContentType(e.to_string()))?;
    let mut multipart = MultiPart::mixed().singlepart(body);
    for path in &mail.attachments {
      let content = tokio::fs::read(path).await.map_err(|source| MailError::Io {
        path: path.clone(),
        source,
      })?;
      let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".into());
      multipart = multipart.singlepart(Attachment::new(filename).body(content, octet_stream.clone()));
    }
    Ok(builder.multipart(multipart)?)
  }
}

#[async_trait]
impl Mailer for SmtpMailer {
  async fn send(&self, mail: Mail) -> Result<(), MailError> {
    let message = self.build_message(&mail).await?;
    let mut attempt = 1;
    loop {
      match self.transport.send(message.clone()).await {
        Ok(_) => {
          debug!(subject = %mail.subject, attempt, "mail sent");
          return Ok(());
        }
        Err(e) if attempt < self.attempts => {
          warn!(subject = %mail.subject, attempt, error = %e, "mail attempt failed, retrying");
          tokio::time::sleep(self.backoff).await;
          attempt += 1;
        }
        Err(e) => return Err(e.into()),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn body_type_is_case_insensitive() {
    assert_eq!(BodyType::from_str_loose("HTML"), Some(BodyType::Html));
    assert_eq!(BodyType::from_str_loose(" Text "), Some(BodyType::Text));
    assert_eq!(BodyType::from_str_loose("markdown"), None);
  }

  fn mailer() -> SmtpMailer {
    let mut email = EmailConfig::default();
    email.sender.address = "builds@example.com".into();
    SmtpMailer::from_config(&email).unwrap()
  }

  fn mail(attachments: Vec<PathBuf>) -> Mail {
    Mail {
      to: vec!["ops@example.com".into()],
      cc: vec!["lead@example.com".into()],
      subject: "Build report".into(),
      body: "<p>ok</p>".into(),
      body_type: BodyType::Html,
      attachments,
    }
  }

  #[tokio::test]
  async fn builds_message_with_attachments() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("v1.build.log");
    std::fs::write(&log, b"step 1\nstep 2\n").unwrap();

    let message = mailer().build_message(&mail(vec![log])).await.unwrap();
    let raw = String::from_utf8(message.formatted()).unwrap();
    assert!(raw.contains("Subject: Build report"));
    assert!(raw.contains("Cc: lead@example.com"));
    assert!(raw.contains("v1.build.log"));
  }

  #[tokio::test]
  async fn missing_attachment_is_io_error() {
    let err = mailer()
      .build_message(&mail(vec![PathBuf::from("/nonexistent/build.log")]))
      .await
      .unwrap_err();
    assert!(matches!(err, MailError::Io { .. }));
  }

  #[tokio::test]
  async fn bad_recipient_is_address_error() {
    let mut bad = mail(Vec::new());
    bad.to = vec!["not an address".into()];
    let err = mailer().build_message(&bad).await.unwrap_err();
    assert!(matches!(err, MailError::Address(_)));
  }
}
