//! Image extraction: pull a build image and copy its report files out.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Files a build-hook image carries, and their local suffixes.
const BUILD_LOG: (&str, &str) = ("/build.log", "build.log");
const COMMIT_INFO: (&str, &str) = ("/git_commit.txt", "git_commit.txt");
const MAIL_BODY: (&str, &str) = ("/mail.body", "mail.body");

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("extract io: {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("unsafe {field} {value:?} in extraction request")]
  UnsafeComponent { field: &'static str, value: String },

  #[error("docker {step} failed ({status}): {stderr}")]
  Command {
    step: &'static str,
    status: String,
    stderr: String,
  },
}

/// What to extract.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
  pub namespace: &'a str,
  pub app: &'a str,
  pub tag: &'a str,
  /// Pullable image reference (the resource locator).
  pub image: &'a str,
}

impl ExtractRequest<'_> {
  /// Namespace, app and tag become path components under the workdir; each
  /// must be a single non-empty segment.
  pub fn validate(&self) -> Result<(), ExtractError> {
    for (field, value) in [
      ("namespace", self.namespace),
      ("app", self.app),
      ("tag", self.tag),
    ] {
      if !is_plain_segment(value) {
        return Err(ExtractError::UnsafeComponent {
          field,
          value: value.to_string(),
        });
      }
    }
    Ok(())
  }
}

fn is_plain_segment(value: &str) -> bool {
  !value.is_empty()
    && value != "."
    && value != ".."
    && !value.contains(['/', '\\', '\0'])
}

/// Extracted report: the mail body plus files to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
  pub mail_body: PathBuf,
  pub attachments: Vec<PathBuf>,
}

#[async_trait]
pub trait ImageExtractor: Send + Sync {
  async fn extract(&self, req: &ExtractRequest<'_>) -> Result<Artifacts, ExtractError>;
}

/// Extraction through the local `docker` CLI: pull, create, cp, rm.
#[derive(Debug, Clone)]
pub struct DockerExtractor {
  workdir: PathBuf,
  docker: PathBuf,
}

impl DockerExtractor {
  pub fn new(workdir: impl Into<PathBuf>) -> Self {
    Self {
      workdir: workdir.into(),
      docker: PathBuf::from("docker"),
    }
  }

  pub fn with_binary(mut self, docker: impl Into<PathBuf>) -> Self {
    self.docker = docker.into();
    self
  }

  /// `<workdir>/<namespace>/<app>/`
  pub fn target_dir(&self, req: &ExtractRequest<'_>) -> PathBuf {
    self.workdir.join(req.namespace).join(req.app)
  }

  async fn docker(&self, step: &'static str, args: &[&str]) -> Result<String, ExtractError> {
    let output = Command::new(&self.docker)
      .args(args)
      .output()
      .await
      .map_err(|source| ExtractError::Io {
        path: self.docker.clone(),
        source,
      })?;
    if !output.status.success() {
      return Err(ExtractError::Command {
        step,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  async fn copy_files(
    &self,
    container: &str,
    dir: &Path,
    tag: &str,
  ) -> Result<Artifacts, ExtractError> {
    let mut copied = Vec::with_capacity(3);
    for (inside, suffix) in [BUILD_LOG, COMMIT_INFO, MAIL_BODY] {
      let local = dir.join(format!("{}.{}", tag, suffix));
      let source = format!("{}:{}", container, inside);
      let dest = local.to_string_lossy().into_owned();
      self.docker("cp", &["cp", source.as_str(), dest.as_str()]).await?;
      debug!(file = inside, local = %local.display(), "extracted");
      copied.push(local);
    }
    let mail_body = copied.pop().unwrap_or_default();
    Ok(Artifacts {
      mail_body,
      attachments: copied,
    })
  }
}

#[async_trait]
impl ImageExtractor for DockerExtractor {
  async fn extract(&self, req: &ExtractRequest<'_>) -> Result<Artifacts, ExtractError> {
    req.validate()?;
    let dir = self.target_dir(req);
    tokio::fs::create_dir_all(&dir)
      .await
      .map_err(|source| ExtractError::Io {
        path: dir.clone(),
        source,
      })?;

    self.docker("pull", &["pull", req.image]).await?;
    let container = self.docker("create", &["create", req.image]).await?;

    let copied = self.copy_files(&container, &dir, req.tag).await;
    if let Err(e) = self.docker("rm", &["rm", "-f", container.as_str()]).await {
      warn!(container = %container, error = %e, "failed to remove extraction container");
    }
    copied
  }
}
