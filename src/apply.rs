//! Bounce application — counters and the suppression threshold.
//!
//! The suppression decision is a pure function of (count, threshold);
//! all mutation goes through the `RecipientStore` capability so the
//! decision logic stays unit-testable without a database.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::extract::{BounceRecord, BouncedRecipient};
use crate::store::RecipientStore;

/// Fixed label for the suppression annotation.
const SUPPRESSION_NOTE: &str = "Suppressed by bounce importer";

/// Whether a recipient at `count` bounces crosses the threshold.
/// A threshold of 0 disables suppression entirely.
pub fn should_suppress(count: i64, threshold: u32) -> bool {
    threshold > 0 && count >= i64::from(threshold)
}

/// Build the annotation note, appending the diagnostic code when present.
fn suppression_note(diagnostic_code: Option<&str>) -> String {
    match diagnostic_code {
        Some(code) => format!("{SUPPRESSION_NOTE} ({code})"),
        None => SUPPRESSION_NOTE.to_string(),
    }
}

/// Counters for one apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub recipients_seen: usize,
    pub incremented: usize,
    pub suppressed: usize,
    pub unknown: usize,
    pub already_suppressed: usize,
    pub skipped_empty: usize,
}

/// Applies extracted bounce records to the recipient store.
pub struct BounceApplier {
    store: Arc<dyn RecipientStore>,
    threshold: u32,
    dry_run: bool,
}

impl BounceApplier {
    pub fn new(store: Arc<dyn RecipientStore>, threshold: u32, dry_run: bool) -> Self {
        Self {
            store,
            threshold,
            dry_run,
        }
    }

    /// Apply a batch of bounce records, one recipient at a time.
    ///
    /// Unknown and already-suppressed recipients are expected steady-state
    /// conditions, not errors. Only store connectivity failures propagate.
    pub async fn apply_all(&self, records: &[BounceRecord]) -> Result<ApplyStats, StoreError> {
        let mut stats = ApplyStats::default();
        for record in records {
            for recipient in &record.recipients {
                self.apply_recipient(recipient, &mut stats).await?;
            }
        }
        info!(
            recipients = stats.recipients_seen,
            incremented = stats.incremented,
            suppressed = stats.suppressed,
            dry_run = self.dry_run,
            "Apply pass complete"
        );
        Ok(stats)
    }

    async fn apply_recipient(
        &self,
        recipient: &BouncedRecipient,
        stats: &mut ApplyStats,
    ) -> Result<(), StoreError> {
        stats.recipients_seen += 1;

        let email = recipient.email_address.as_str();
        if email.is_empty() {
            stats.skipped_empty += 1;
            return Ok(());
        }

        let Some(current) = self.store.find_by_email(email).await? else {
            debug!(email, "Bounced address is not a known recipient");
            stats.unknown += 1;
            return Ok(());
        };

        if current.suppressed {
            debug!(email, "Recipient already suppressed");
            stats.already_suppressed += 1;
            return Ok(());
        }

        let new_count = current.bounce_count + 1;
        info!(email, count = new_count, "Bounce recorded");
        if !self.dry_run {
            self.store.increment_bounce_count(email).await?;
        }
        stats.incremented += 1;

        if should_suppress(new_count, self.threshold) {
            let note = suppression_note(recipient.diagnostic_code.as_deref());
            info!(email, note = %note, "Recipient suppressed");
            if !self.dry_run {
                self.store.suppress(email, &note).await?;
            }
            stats.suppressed += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::store::RecipientRecord;

    /// In-memory store that records every mutating call.
    #[derive(Default)]
    struct MockStore {
        rows: Mutex<HashMap<String, RecipientRecord>>,
        increments: Mutex<Vec<String>>,
        suppressions: Mutex<Vec<(String, String)>>,
    }

    impl MockStore {
        fn with_recipient(self, email: &str, bounce_count: i64, suppressed: bool) -> Self {
            self.rows.lock().unwrap().insert(
                email.to_string(),
                RecipientRecord {
                    email: email.to_string(),
                    bounce_count,
                    suppressed,
                },
            );
            self
        }

        fn write_count(&self) -> usize {
            self.increments.lock().unwrap().len() + self.suppressions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RecipientStore for MockStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<RecipientRecord>, StoreError> {
            Ok(self.rows.lock().unwrap().get(email).cloned())
        }

        async fn increment_bounce_count(&self, email: &str) -> Result<(), StoreError> {
            self.increments.lock().unwrap().push(email.to_string());
            if let Some(row) = self.rows.lock().unwrap().get_mut(email) {
                row.bounce_count += 1;
            }
            Ok(())
        }

        async fn suppress(&self, email: &str, note: &str) -> Result<(), StoreError> {
            self.suppressions
                .lock()
                .unwrap()
                .push((email.to_string(), note.to_string()));
            if let Some(row) = self.rows.lock().unwrap().get_mut(email) {
                row.suppressed = true;
            }
            Ok(())
        }
    }

    fn record_for(email: &str, code: Option<&str>) -> BounceRecord {
        BounceRecord {
            bounce_type: "Permanent".into(),
            recipients: vec![BouncedRecipient {
                email_address: email.into(),
                diagnostic_code: code.map(str::to_string),
            }],
        }
    }

    #[test]
    fn decision_respects_threshold() {
        assert!(!should_suppress(1, 3));
        assert!(!should_suppress(2, 3));
        assert!(should_suppress(3, 3));
        assert!(should_suppress(4, 3));
    }

    #[test]
    fn decision_disabled_at_zero_threshold() {
        assert!(!should_suppress(100, 0));
    }

    #[tokio::test]
    async fn unknown_recipient_is_a_noop() {
        let store = Arc::new(MockStore::default());
        let applier = BounceApplier::new(store.clone(), 3, false);

        let stats = applier
            .apply_all(&[record_for("ghost@x.com", None)])
            .await
            .unwrap();

        assert_eq!(stats.unknown, 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn empty_address_skipped_silently() {
        let store = Arc::new(MockStore::default());
        let applier = BounceApplier::new(store.clone(), 3, false);

        let stats = applier.apply_all(&[record_for("", None)]).await.unwrap();

        assert_eq!(stats.skipped_empty, 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn below_threshold_increments_without_suppressing() {
        let store = Arc::new(MockStore::default().with_recipient("a@x.com", 1, false));
        let applier = BounceApplier::new(store.clone(), 3, false);

        let stats = applier
            .apply_all(&[record_for("a@x.com", None)])
            .await
            .unwrap();

        assert_eq!(stats.incremented, 1);
        assert_eq!(stats.suppressed, 0);
        assert_eq!(store.increments.lock().unwrap().len(), 1);
        assert!(store.suppressions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reaching_threshold_suppresses_with_diagnostic_note() {
        let store = Arc::new(MockStore::default().with_recipient("a@x.com", 2, false));
        let applier = BounceApplier::new(store.clone(), 3, false);

        let stats = applier
            .apply_all(&[record_for("a@x.com", Some("550 5.1.1 unknown user"))])
            .await
            .unwrap();

        assert_eq!(stats.suppressed, 1);
        let suppressions = store.suppressions.lock().unwrap();
        assert_eq!(suppressions[0].0, "a@x.com");
        assert!(suppressions[0].1.contains("550 5.1.1 unknown user"));
    }

    #[tokio::test]
    async fn already_suppressed_recipient_never_recounted() {
        let store = Arc::new(MockStore::default().with_recipient("a@x.com", 9, true));
        let applier = BounceApplier::new(store.clone(), 3, false);

        let stats = applier
            .apply_all(&[record_for("a@x.com", None)])
            .await
            .unwrap();

        assert_eq!(stats.already_suppressed, 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn suppression_takes_effect_mid_batch() {
        // Threshold 2, starting at 0: first bounce counts, second bounce
        // suppresses, third sees the flag and is a no-op.
        let store = Arc::new(MockStore::default().with_recipient("a@x.com", 0, false));
        let applier = BounceApplier::new(store.clone(), 2, false);

        let batch = vec![
            record_for("a@x.com", None),
            record_for("a@x.com", None),
            record_for("a@x.com", None),
        ];
        let stats = applier.apply_all(&batch).await.unwrap();

        assert_eq!(stats.incremented, 2);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.already_suppressed, 1);
    }

    #[tokio::test]
    async fn dry_run_produces_zero_writes() {
        let store = Arc::new(MockStore::default().with_recipient("a@x.com", 2, false));
        let applier = BounceApplier::new(store.clone(), 3, true);

        let stats = applier
            .apply_all(&[record_for("a@x.com", Some("550"))])
            .await
            .unwrap();

        // Decision branches still taken, nothing persisted.
        assert_eq!(stats.incremented, 1);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn threshold_zero_never_suppresses() {
        let store = Arc::new(MockStore::default().with_recipient("a@x.com", 50, false));
        let applier = BounceApplier::new(store.clone(), 0, false);

        let stats = applier
            .apply_all(&[record_for("a@x.com", None)])
            .await
            .unwrap();

        assert_eq!(stats.incremented, 1);
        assert_eq!(stats.suppressed, 0);
    }

    #[test]
    fn note_includes_code_when_present() {
        assert_eq!(
            suppression_note(Some("550")),
            "Suppressed by bounce importer (550)"
        );
        assert_eq!(suppression_note(None), "Suppressed by bounce importer");
    }
}
