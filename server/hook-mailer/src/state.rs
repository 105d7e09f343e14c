use std::sync::Arc;

use hook_stats::Registry;

use crate::clock::Clock;
use crate::extract::ImageExtractor;
use crate::notify::Notifier;

/// Shared state behind the webhook router.
pub struct AppState {
  pub registry: Arc<Registry>,
  pub extractor: Arc<dyn ImageExtractor>,
  pub notifier: Arc<Notifier>,
  pub clock: Arc<dyn Clock>,
  /// Locator substring that marks a build-hook image.
  pub marker: String,
}
