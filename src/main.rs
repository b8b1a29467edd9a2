use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

use page_autoreply::config::{BotConfig, RuleSourceKind, RunMode};
use page_autoreply::graph::{GraphClient, PageApi, REPLY_LOG_TARGET};
use page_autoreply::ledger::SeenLedger;
use page_autoreply::orchestrator::Orchestrator;
use page_autoreply::rules::{ResponsesFileSource, RuleSource, RuleStoreSource};
use page_autoreply::store::LibSqlBackend;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export FB_ACCESS_TOKEN=... FB_PAGE_ID=...");
            return Ok(ExitCode::FAILURE);
        }
    };

    let _reply_log_guard = init_tracing(&config.reply_log_path)?;

    eprintln!("💬 Page auto-responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Page: {}", config.graph.page_id);
    eprintln!("   Mode: {:?}", config.mode);
    eprintln!("   Rules: {:?}", config.rule_source);
    eprintln!("   Policy: {:?}", config.orchestrator.policy);
    eprintln!("   Workers: {}\n", config.orchestrator.workers);

    let api: Arc<dyn PageApi> =
        Arc::new(GraphClient::new(config.graph.clone()).context("Failed to build API client")?);

    // ── Rule source ──────────────────────────────────────────────────────
    let source: Arc<dyn RuleSource> = match config.rule_source {
        RuleSourceKind::File => Arc::new(ResponsesFileSource::new(config.responses_path.clone())),
        RuleSourceKind::Database => {
            let store = LibSqlBackend::new_local(&config.db_path)
                .await
                .with_context(|| {
                    format!("Failed to open rule database at {}", config.db_path.display())
                })?;
            Arc::new(RuleStoreSource::new(Arc::new(store)))
        }
    };

    // ── Seen ledger ──────────────────────────────────────────────────────
    let ledger = Arc::new(SeenLedger::load(&config.seen_path).await.with_context(|| {
        format!("Failed to load seen ledger at {}", config.seen_path.display())
    })?);

    let orchestrator = Orchestrator::new(api, source, ledger, config.orchestrator.clone());

    match config.mode {
        RunMode::Once => match orchestrator.run_cycle().await {
            Ok(report) => {
                println!(
                    "Processed {} of {} posts ({} replies)",
                    report.completed, report.posts, report.replied
                );
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                error!(error = %e, "Cycle failed");
                eprintln!("Error: {e}");
                Ok(ExitCode::FAILURE)
            }
        },
        RunMode::Daemon => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Shutdown requested");
                        let _ = shutdown_tx.send(true);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to listen for Ctrl-C");
                        // Keep the sender alive so the daemon keeps running.
                        std::future::pending::<()>().await;
                    }
                }
            });

            orchestrator.run_daemon(shutdown_rx).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Console logs filtered by `RUST_LOG`, plus the reply audit log appended
/// to `reply_log_path`.
fn init_tracing(reply_log_path: &Path) -> anyhow::Result<WorkerGuard> {
    let dir = reply_log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = reply_log_path
        .file_name()
        .context("Reply log path has no file name")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    let console = fmt::layer().with_target(false).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    let reply_log = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(Targets::new().with_target(REPLY_LOG_TARGET, tracing::Level::INFO));

    tracing_subscriber::registry()
        .with(console)
        .with(reply_log)
        .init();

    Ok(guard)
}
