//! Bounce extraction — admission checks and payload parsing.
//!
//! SNS delivers the bounce notification as a JSON document embedded in a
//! human-readable SES email, and the surrounding text is not contractually
//! stable. Extraction therefore scans for JSON-shaped candidate fragments
//! and attempts a real parse of each one, discarding failures
//! independently, instead of decoding the whole body against a schema.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::mailbox::ParsedHeader;

/// Header carrying the SNS subscription ARN, matched with the case it
/// was delivered in.
const TOPIC_HEADER: &str = "x-amz-sns-subscription-arn";

/// Candidate fragment shape: from the `{"bounceType"` opener up to the
/// first `}}`. Deliberately not brace-balancing — see
/// [`BounceExtractor::extract_records`].
static FRAGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{"bounceType".*?\}\}"#).expect("fragment pattern is valid"));

// ── Data model ──────────────────────────────────────────────────────

/// One decoded bounce notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BounceRecord {
    #[serde(rename = "bounceType")]
    pub bounce_type: String,
    #[serde(rename = "bouncedRecipients", default)]
    pub recipients: Vec<BouncedRecipient>,
}

/// One recipient reported by a bounce notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BouncedRecipient {
    /// Empty addresses are dropped silently at apply time.
    #[serde(rename = "emailAddress", default)]
    pub email_address: String,
    /// Free-text reason, used only as an annotation on suppression.
    #[serde(rename = "diagnosticCode", default)]
    pub diagnostic_code: Option<String>,
}

/// Wrapper the raw fragment is parsed under, mirroring the shape of the
/// full SNS document the fragment was cut out of.
#[derive(Debug, Deserialize)]
struct BounceEnvelope {
    bounce: BounceRecord,
}

// ── Admission ───────────────────────────────────────────────────────

/// Sender and topic allow-lists. An empty list on either axis imposes no
/// filtering on that axis.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    allowed_senders: Vec<String>,
    allowed_topics: Vec<String>,
}

impl AdmissionPolicy {
    pub fn new(allowed_senders: Vec<String>, allowed_topics: Vec<String>) -> Self {
        Self {
            allowed_senders,
            allowed_topics,
        }
    }

    /// Decide whether a message may enter extraction.
    ///
    /// Senders are matched as exact `mailbox@host` strings. Topics are
    /// matched against the `x-amz-sns-subscription-arn` header value with
    /// its trailing `:suffix` segment stripped (the region/id tail of an
    /// ARN-shaped value).
    pub fn is_admissible(&self, header: &ParsedHeader, raw_header: &str) -> bool {
        if !self.allowed_senders.is_empty() {
            let Some(from) = header.from.as_ref() else {
                return false;
            };
            if !self.allowed_senders.contains(&from.address()) {
                return false;
            }
        }

        if !self.allowed_topics.is_empty() {
            let headers = scan_folded_headers(raw_header);
            let Some((_, value)) = headers.iter().find(|(name, _)| name == TOPIC_HEADER) else {
                return false;
            };
            let topic = strip_arn_suffix(value);
            if !self.allowed_topics.iter().any(|t| t == topic) {
                return false;
            }
        }

        true
    }
}

/// Scan a raw header blob into `(name, value)` pairs, folding indented
/// continuation lines into the previous value.
pub fn scan_folded_headers(raw: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in raw.split("\r\n").flat_map(|l| l.split('\n')) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            // Blank line ends the header block.
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim_start());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(": ") {
            headers.push((name.to_string(), value.to_string()));
        }
    }
    headers
}

/// Truncate an ARN-shaped value at its final `:`, discarding the trailing
/// segment. A value without a `:` truncates to empty.
fn strip_arn_suffix(value: &str) -> &str {
    match value.rfind(':') {
        Some(idx) => &value[..idx],
        None => "",
    }
}

// ── Extraction ──────────────────────────────────────────────────────

/// Extracts bounce records from free-form message bodies.
#[derive(Debug, Clone, Default)]
pub struct BounceExtractor;

impl BounceExtractor {
    /// Extract zero or more bounce records from a message body.
    ///
    /// Line breaks are stripped first because the mail transport may fold
    /// the embedded document arbitrarily. Candidates end at the first
    /// `}}` after the opening token; on payloads whose recipient list is
    /// followed by further nested objects this can cut a fragment short
    /// and lose it as a parse failure. That heuristic matches what
    /// currently-working inputs were validated against, so it is kept
    /// rather than replaced with true brace balancing.
    ///
    /// A fragment that fails to parse is skipped on its own; extraction
    /// itself never fails.
    pub fn extract_records(&self, body: &str) -> Vec<BounceRecord> {
        let flat: String = body.chars().filter(|c| *c != '\n' && *c != '\r').collect();

        let mut records = Vec::new();
        for candidate in FRAGMENT_RE.find_iter(&flat) {
            let wrapped = format!("{{\"bounce\":{}", candidate.as_str());
            match serde_json::from_str::<BounceEnvelope>(&wrapped) {
                Ok(envelope) => records.push(envelope.bounce),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed bounce fragment");
                }
            }
        }
        records
    }
}
