//! Mailbox capability — the interface the pipeline consumes.
//!
//! The transport itself is a thin collaborator: the pipeline only needs
//! to open a session, list messages, fetch header/body text, and
//! delete/expunge what it consumed.

pub mod imap;

use crate::config::MailboxConfig;
use crate::error::MailboxError;

pub use imap::ImapStore;

/// Identifier of one message within an open session (IMAP sequence number).
pub type MessageId = u32;

/// The parsed From address of a message, as mailbox + host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromAddress {
    pub mailbox: String,
    pub host: String,
}

impl FromAddress {
    /// Split a full `mailbox@host` address. Returns `None` without an `@`.
    pub fn parse(addr: &str) -> Option<Self> {
        let (mailbox, host) = addr.rsplit_once('@')?;
        Some(Self {
            mailbox: mailbox.to_string(),
            host: host.to_string(),
        })
    }

    /// Reconstruct the full `mailbox@host` form used for allow-list matching.
    pub fn address(&self) -> String {
        format!("{}@{}", self.mailbox, self.host)
    }
}

/// Parsed header metadata for one fetched message.
#[derive(Debug, Clone, Default)]
pub struct ParsedHeader {
    pub from: Option<FromAddress>,
}

/// Opens mailbox sessions.
pub trait MessageStore: Send {
    fn open(&self, config: &MailboxConfig) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// One authenticated, stateful connection scoped to a single folder.
///
/// All methods are blocking; the pipeline runs the whole mailbox stage
/// under `spawn_blocking`.
pub trait MailboxSession: Send {
    /// List every message in the folder.
    fn list_all(&mut self) -> Result<Vec<MessageId>, MailboxError>;

    /// Fetch parsed header metadata. `None` when the header is unparseable.
    fn fetch_header(&mut self, id: MessageId) -> Result<Option<ParsedHeader>, MailboxError>;

    /// Fetch the full raw header text (for the folded-header topic scan).
    fn fetch_raw_header(&mut self, id: MessageId) -> Result<String, MailboxError>;

    /// Fetch the message body as text.
    fn fetch_body(&mut self, id: MessageId) -> Result<String, MailboxError>;

    /// Mark a message deleted.
    fn delete(&mut self, id: MessageId) -> Result<(), MailboxError>;

    /// Commit pending deletions.
    fn expunge(&mut self) -> Result<(), MailboxError>;

    /// Close the session. Must be called even after a mid-loop error.
    fn close(&mut self) -> Result<(), MailboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_address_parse_round_trip() {
        let from = FromAddress::parse("no-reply@sns.amazonaws.com").unwrap();
        assert_eq!(from.mailbox, "no-reply");
        assert_eq!(from.host, "sns.amazonaws.com");
        assert_eq!(from.address(), "no-reply@sns.amazonaws.com");
    }

    #[test]
    fn from_address_splits_at_last_at_sign() {
        let from = FromAddress::parse("\"odd@local\"@example.com").unwrap();
        assert_eq!(from.mailbox, "\"odd@local\"");
        assert_eq!(from.host, "example.com");
    }

    #[test]
    fn from_address_without_at_is_none() {
        assert!(FromAddress::parse("not-an-address").is_none());
    }
}
