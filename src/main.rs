use std::sync::Arc;

use bounce_sweep::config::SweepConfig;
use bounce_sweep::mailbox::ImapStore;
use bounce_sweep::pipeline;
use bounce_sweep::store::{LibSqlRecipientStore, RecipientStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = match SweepConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Silent mode keeps failures visible but drops progress narration.
    let default_filter = if config.silent { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    tracing::info!(
        host = %config.mailbox.host,
        folder = %config.mailbox.folder,
        threshold = config.suppression_threshold,
        dry_run = config.dry_run,
        "Starting bounce sweep"
    );

    // Stage one: sweep the mailbox. A connectivity failure ends the run
    // here — the sweep is re-run by an external scheduler and always
    // exits with success.
    let outcome = match pipeline::collect(&config, Box::new(ImapStore)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Mailbox stage aborted");
            return Ok(());
        }
    };

    if outcome.records.is_empty() {
        tracing::info!("No bounce records found, nothing to apply");
        return Ok(());
    }

    // Stage two: the mailbox session is closed and its deletions are
    // committed; store trouble from here on affects only the apply stage.
    let recipients: Arc<dyn RecipientStore> = match LibSqlRecipientStore::new_local(
        std::path::Path::new(&config.db_path),
        &config.table_prefix,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "Could not open recipient database");
            return Ok(());
        }
    };

    match pipeline::apply_records(&config, &outcome.records, recipients).await {
        Ok(stats) => {
            tracing::info!(
                scanned = outcome.scanned,
                extracted = outcome.records.len(),
                deleted = outcome.deleted,
                incremented = stats.incremented,
                suppressed = stats.suppressed,
                "Sweep complete"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Apply stage aborted");
        }
    }

    Ok(())
}
