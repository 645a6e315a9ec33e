mod api;
mod cache;
mod clock;
mod config;
mod error;
mod legal;
mod settings;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::clock::{SystemClock, TokioSleeper};
use crate::legal::{CachedLegalClient, LegalClient, RetryPolicy};

#[derive(Parser, Debug)]
#[command(name = "casemirror")]
#[command(about = "Caching mirror for a rate-limited case-management API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/casemirror/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Address to listen on, overrides server.bind
  #[arg(short, long)]
  bind: Option<String>,

  /// Write logs to daily files in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,
}

fn init_logging(log_dir: Option<&Path>) -> Result<WorkerGuard> {
  let (writer, guard) = match log_dir {
    Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "casemirror.log")),
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_ansi(log_dir.is_none())
    .with_writer(writer)
    .try_init()
    .map_err(|e| color_eyre::eyre::eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_dir.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let token = config::Config::get_api_token()?;
  let settings = settings::load_from_path(&config.settings.database_path()?);

  let sleeper = Arc::new(TokioSleeper);
  let inner = LegalClient::new(
    &config.upstream,
    RetryPolicy::from(&config.retry),
    token,
    sleeper.clone(),
  )?;
  let legal = CachedLegalClient::new(
    inner,
    &settings,
    config.crawl.options(),
    Arc::new(SystemClock),
    sleeper,
  );

  let bind = args.bind.unwrap_or(config.server.bind);
  api::start_server(&bind, api::AppState::new(legal)).await
}
