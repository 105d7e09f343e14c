//! Binary entrypoint for the build hook mailer.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hook_mailer::clock::{Clock, SystemClock};
use hook_mailer::extract::DockerExtractor;
use hook_mailer::mail::{Mailer, SmtpMailer};
use hook_mailer::notify::Notifier;
use hook_mailer::{AppState, Config, SchedulePlan, Scheduler};
use hook_stats::{Registry, SnapshotStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hook_mailer=info,hook_stats=info,tower_http=info")),
    )
    .init();

  let config = Config::load()?;

  let registry = Arc::new(Registry::seeded(&config.hook.apps));
  let store = Arc::new(SnapshotStore::new(&config.hook.stats_file));
  match store.restore_into(&registry) {
    Ok(restored) => info!(restored, path = %store.path().display(), "stats snapshot loaded"),
    Err(e) => error!(error = %e, "stats snapshot unreadable, starting from configured apps"),
  }
  for record in registry.snapshot().values() {
    info!(
      app = %record.name,
      calls = record.calls,
      errors = record.errors,
      create_time = %record.once.create_time,
      "app stats"
    );
  }

  let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::from_config(&config.email)?);
  let notifier = Arc::new(Notifier::new(mailer, &config.email)?);
  let clock: Arc<dyn Clock> = Arc::new(SystemClock);

  let scheduler = Scheduler::new(
    registry.clone(),
    notifier.clone(),
    store.clone(),
    clock.clone(),
    SchedulePlan::from_config(&config.hook)?,
  );
  let loops = scheduler.spawn();

  let state = Arc::new(AppState {
    registry: registry.clone(),
    extractor: Arc::new(DockerExtractor::new(&config.hook.workdir)),
    notifier,
    clock,
    marker: config.hook.marker.clone(),
  });
  let app = hook_mailer::router(state, &config.hook.context_path);

  let addr = config.bind_addr();
  let listener = TcpListener::bind(&addr).await?;
  info!("hook-mailer listening on http://{}{}", addr, config.hook.context_path);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  for handle in loops {
    handle.abort();
  }
  info!("shutting down, writing final stats snapshot");
  if let Err(e) = store.flush(&registry) {
    error!(error = %e, "final stats snapshot failed");
  }
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      error!(error = %e, "ctrl-c handler failed");
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => error!(error = %e, "SIGTERM handler failed"),
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
}
