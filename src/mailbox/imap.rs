//! Raw IMAP-over-TLS mailbox session (blocking — run under `spawn_blocking`).
//!
//! Speaks just enough IMAP for one sweep pass: LOGIN, SELECT, SEARCH ALL,
//! FETCH of header/body sections, STORE `\Deleted`, EXPUNGE, LOGOUT.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::time::Duration;

use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::mailbox::{FromAddress, MailboxSession, MessageId, MessageStore, ParsedHeader};

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens [`ImapSession`]s. The only production [`MessageStore`].
#[derive(Debug, Default)]
pub struct ImapStore;

impl MessageStore for ImapStore {
    fn open(&self, config: &MailboxConfig) -> Result<Box<dyn MailboxSession>, MailboxError> {
        Ok(Box::new(ImapSession::open(config)?))
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One authenticated IMAP session with a folder selected.
pub struct ImapSession {
    tls: TlsStream,
    tag: u32,
    closed: bool,
}

impl ImapSession {
    /// Connect, authenticate, and select the configured folder.
    pub fn open(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((&*config.host, config.port))
            .map_err(|e| MailboxError::Connect(format!("{}:{}: {e}", config.host, config.port)))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = std::sync::Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
            closed: false,
        };

        let greeting = session.read_line()?;
        debug!(greeting = %greeting.trim_end(), "IMAP connected");

        let login = session.command(&format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ))?;
        if !response_ok(&login) {
            return Err(MailboxError::Auth(format!(
                "login rejected for {}",
                config.username
            )));
        }

        let select = session.command(&format!("SELECT \"{}\"", config.folder))?;
        if !response_ok(&select) {
            return Err(MailboxError::Protocol(format!(
                "could not select folder {:?}",
                config.folder
            )));
        }

        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => {
                    return Err(MailboxError::Protocol("connection closed by server".into()));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send one tagged command and collect response lines up to the tagged
    /// completion line (inclusive).
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, MailboxError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let full = format!("{tag} {cmd}\r\n");
        IoWrite::write_all(&mut self.tls, full.as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// FETCH one section of a message and return its text payload.
    fn fetch_section(&mut self, id: MessageId, item: &str) -> Result<String, MailboxError> {
        let lines = self.command(&format!("FETCH {id} ({item})"))?;
        if !response_ok(&lines) {
            return Err(MailboxError::Protocol(format!(
                "FETCH {id} {item} failed"
            )));
        }
        Ok(fetch_payload(&lines))
    }
}

impl MailboxSession for ImapSession {
    fn list_all(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        let lines = self.command("SEARCH ALL")?;
        if !response_ok(&lines) {
            return Err(MailboxError::Protocol("SEARCH ALL failed".into()));
        }
        Ok(parse_search_response(&lines))
    }

    fn fetch_header(&mut self, id: MessageId) -> Result<Option<ParsedHeader>, MailboxError> {
        let raw = self.fetch_section(id, "BODY.PEEK[HEADER]")?;
        let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) else {
            return Ok(None);
        };
        let from = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .and_then(FromAddress::parse);
        Ok(Some(ParsedHeader { from }))
    }

    fn fetch_raw_header(&mut self, id: MessageId) -> Result<String, MailboxError> {
        self.fetch_section(id, "BODY.PEEK[HEADER]")
    }

    fn fetch_body(&mut self, id: MessageId) -> Result<String, MailboxError> {
        self.fetch_section(id, "BODY.PEEK[TEXT]")
    }

    fn delete(&mut self, id: MessageId) -> Result<(), MailboxError> {
        let lines = self.command(&format!("STORE {id} +FLAGS (\\Deleted)"))?;
        if !response_ok(&lines) {
            return Err(MailboxError::Protocol(format!("STORE {id} failed")));
        }
        Ok(())
    }

    fn expunge(&mut self) -> Result<(), MailboxError> {
        let lines = self.command("EXPUNGE")?;
        if !response_ok(&lines) {
            return Err(MailboxError::Protocol("EXPUNGE failed".into()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), MailboxError> {
        if !self.closed {
            self.closed = true;
            // Best effort — the TCP stream drops either way.
            let _ = self.command("LOGOUT");
        }
        Ok(())
    }
}

// ── Response parsing helpers ────────────────────────────────────────

/// Whether the tagged completion line reports OK.
fn response_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.contains("OK"))
}

/// Pull message ids out of `* SEARCH n n n` lines.
fn parse_search_response(lines: &[String]) -> Vec<MessageId> {
    let mut ids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            ids.extend(
                line.split_whitespace()
                    .skip(2)
                    .filter_map(|s| s.parse::<MessageId>().ok()),
            );
        }
    }
    ids
}

/// Join the literal payload lines of a FETCH response, dropping the
/// untagged `* n FETCH` prefix line, the closing `)`, and the tagged
/// completion line.
fn fetch_payload(lines: &[String]) -> String {
    let mut text: String = lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(2))
        .cloned()
        .collect();
    if let Some(stripped) = text.strip_suffix(")\r\n") {
        text = stripped.to_string();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| format!("{l}\r\n")).collect()
    }

    #[test]
    fn search_response_collects_ids() {
        let resp = lines(&["* SEARCH 1 3 12", "A2 OK SEARCH completed"]);
        assert_eq!(parse_search_response(&resp), vec![1, 3, 12]);
    }

    #[test]
    fn search_response_empty_mailbox() {
        let resp = lines(&["* SEARCH", "A2 OK SEARCH completed"]);
        assert!(parse_search_response(&resp).is_empty());
    }

    #[test]
    fn fetch_payload_strips_framing() {
        let resp = lines(&[
            "* 1 FETCH (BODY[HEADER] {64}",
            "From: no-reply@sns.amazonaws.com",
            "Subject: AWS Notification",
            ")",
            "A3 OK FETCH completed",
        ]);
        let payload = fetch_payload(&resp);
        assert!(payload.starts_with("From: no-reply@sns.amazonaws.com\r\n"));
        assert!(payload.ends_with("Subject: AWS Notification\r\n"));
        assert!(!payload.contains("FETCH"));
    }

    #[test]
    fn response_ok_checks_tagged_line() {
        assert!(response_ok(&lines(&["* SEARCH", "A2 OK done"])));
        assert!(!response_ok(&lines(&["A2 NO [AUTHENTICATIONFAILED]"])));
    }
}
