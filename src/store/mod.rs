//! Persistence layer — the recipient store the applier writes into.

pub mod libsql_backend;

use async_trait::async_trait;

use crate::error::StoreError;

pub use libsql_backend::LibSqlRecipientStore;

/// One recipient row as seen through the store interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRecord {
    pub email: String,
    /// Monotonically non-decreasing while the recipient is not suppressed.
    pub bounce_count: i64,
    /// One-way transition false → true; never reset by this pipeline.
    pub suppressed: bool,
}

/// Backend-agnostic recipient store trait.
#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Look up a recipient by address.
    async fn find_by_email(&self, email: &str) -> Result<Option<RecipientRecord>, StoreError>;

    /// Increment the bounce counter of one recipient.
    async fn increment_bounce_count(&self, email: &str) -> Result<(), StoreError>;

    /// Mark a recipient suppressed and record the annotation note.
    async fn suppress(&self, email: &str, note: &str) -> Result<(), StoreError>;
}
