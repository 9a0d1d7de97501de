//! Pipeline coordinator — one full sweep pass.
//!
//! Stage one (blocking): open the mailbox, scan every message through
//! admission and extraction, delete/expunge consumed messages, close the
//! session. Stage two (async): hand the accumulated records to the
//! applier. The session is always closed before the apply stage starts,
//! so persistence failures cannot affect mailbox state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::apply::{ApplyStats, BounceApplier};
use crate::config::SweepConfig;
use crate::error::{Error, MailboxError};
use crate::extract::{AdmissionPolicy, BounceExtractor, BounceRecord};
use crate::mailbox::{MailboxSession, MessageStore};
use crate::store::RecipientStore;

/// Result of the mailbox stage.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Extracted records, in mailbox order.
    pub records: Vec<BounceRecord>,
    pub scanned: usize,
    pub admitted: usize,
    pub deleted: usize,
}

/// Result of one full pass.
#[derive(Debug)]
pub struct RunSummary {
    pub scanned: usize,
    pub admitted: usize,
    pub extracted: usize,
    pub deleted: usize,
    pub apply: ApplyStats,
}

/// Run the mailbox stage: connect, scan, delete/expunge, disconnect.
///
/// The session is closed unconditionally — a failure mid-loop still
/// surfaces, but never leaks an open session.
pub fn collect_bounces(
    store: &dyn MessageStore,
    config: &SweepConfig,
) -> Result<SweepOutcome, MailboxError> {
    let policy = AdmissionPolicy::new(
        config.allowed_senders.clone(),
        config.allowed_topics.clone(),
    );

    let mut session = store.open(&config.mailbox)?;
    let result = scan_messages(session.as_mut(), config, &policy);
    if let Err(e) = session.close() {
        warn!(error = %e, "Mailbox session did not close cleanly");
    }
    result
}

fn scan_messages(
    session: &mut dyn MailboxSession,
    config: &SweepConfig,
    policy: &AdmissionPolicy,
) -> Result<SweepOutcome, MailboxError> {
    let extractor = BounceExtractor;
    let mut outcome = SweepOutcome::default();
    let mut marked = Vec::new();

    let ids = session.list_all()?;
    info!(messages = ids.len(), "Mailbox listed");

    for id in ids {
        outcome.scanned += 1;

        let Some(header) = session.fetch_header(id)? else {
            debug!(id, "Unparseable header, skipping");
            continue;
        };
        let raw_header = session.fetch_raw_header(id)?;

        if !policy.is_admissible(&header, &raw_header) {
            debug!(id, "Message not admissible, leaving untouched");
            continue;
        }
        outcome.admitted += 1;

        let body = session.fetch_body(id)?;
        let records = extractor.extract_records(&body);
        debug!(id, records = records.len(), "Message extracted");

        // Only messages that actually produced records are consumed.
        if !records.is_empty() {
            if config.delete_processed {
                marked.push(id);
            }
            outcome.records.extend(records);
        }
    }

    for id in &marked {
        session.delete(*id)?;
        outcome.deleted += 1;
    }
    if !marked.is_empty() {
        session.expunge()?;
    }

    Ok(outcome)
}

/// Run the mailbox stage on the blocking pool.
pub async fn collect(
    config: &SweepConfig,
    mailbox: Box<dyn MessageStore>,
) -> Result<SweepOutcome, Error> {
    let cfg = config.clone();
    let outcome = tokio::task::spawn_blocking(move || collect_bounces(mailbox.as_ref(), &cfg))
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))??;

    info!(
        scanned = outcome.scanned,
        admitted = outcome.admitted,
        extracted = outcome.records.len(),
        deleted = outcome.deleted,
        "Mailbox stage complete"
    );
    Ok(outcome)
}

/// Run the apply stage against an already-opened recipient store.
pub async fn apply_records(
    config: &SweepConfig,
    records: &[BounceRecord],
    recipients: Arc<dyn RecipientStore>,
) -> Result<ApplyStats, Error> {
    let applier = BounceApplier::new(recipients, config.suppression_threshold, config.dry_run);
    Ok(applier.apply_all(records).await?)
}

/// Drive one full pass: mailbox stage, then the apply stage. The caller
/// opens the recipient store; `main` defers that until the mailbox stage
/// has finished so a store failure cannot block the sweep itself.
pub async fn run(
    config: SweepConfig,
    mailbox: Box<dyn MessageStore>,
    recipients: Arc<dyn RecipientStore>,
) -> Result<RunSummary, Error> {
    let outcome = collect(&config, mailbox).await?;
    let apply = apply_records(&config, &outcome.records, recipients).await?;

    Ok(RunSummary {
        scanned: outcome.scanned,
        admitted: outcome.admitted,
        extracted: outcome.records.len(),
        deleted: outcome.deleted,
        apply,
    })
}
