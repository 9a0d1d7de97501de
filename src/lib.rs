//! Bounce Sweep — one-shot bounce-notification importer.
//!
//! Sweeps a mailbox for SNS bounce notifications, extracts the embedded
//! bounce payloads, and applies them to a recipient store: every bounce
//! increments a per-address counter, and addresses that cross the
//! configured threshold are suppressed from future sends.

pub mod apply;
pub mod config;
pub mod error;
pub mod extract;
pub mod mailbox;
pub mod pipeline;
pub mod store;
