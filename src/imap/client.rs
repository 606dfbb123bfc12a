//! Mailbox client: bounded search + fetch + parse
//!
//! Searches are always per-sender and date-bounded, so one poll costs
//! O(distinct open-ticket customers) rather than O(mailbox size). Fetched
//! messages are parsed into [`RawEmail`] records; a message that fails to
//! parse is logged and skipped without aborting the batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

use crate::imap::connection::{connect, ImapConnection};
use crate::imap::MailboxSession;
use crate::types::error::{BridgeError, Result};
use crate::types::{ImapCredentials, RawEmail};

/// Build the UID SEARCH query for one sender with a date bound.
///
/// IMAP SINCE compares against the message's internal date with day
/// granularity, so the bound is inclusive of `since`'s calendar day.
/// The sender is a quoted string on the wire; quotes and backslashes in it
/// must be escaped or they corrupt the query.
pub fn since_query(sender: &str, since: DateTime<Utc>) -> String {
    let escaped = sender.replace('\\', "\\\\").replace('"', "\\\"");
    format!("FROM \"{}\" SINCE {}", escaped, since.format("%d-%b-%Y"))
}

/// One authenticated mailbox session with search/fetch/parse on top.
pub struct MailboxClient {
    conn: ImapConnection,
    host: String,
}

impl MailboxClient {
    /// Connect and select the inbox.
    pub async fn connect(credentials: &ImapCredentials) -> Result<Self> {
        let mut conn = connect(credentials).await?;
        conn.select_inbox().await?;
        Ok(Self {
            conn,
            host: credentials.host.clone(),
        })
    }
}

#[async_trait]
impl MailboxSession for MailboxClient {
    async fn search_by_sender_since(
        &mut self,
        sender: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawEmail>> {
        let query = since_query(sender, since);
        let uids = self.conn.uid_search(&query).await?;

        debug!(
            host = %self.host,
            sender = %sender,
            uids = uids.len(),
            "Mailbox search complete"
        );

        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let uid_list: String = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches = self.conn.uid_fetch(&uid_list, "(UID BODY.PEEK[])").await?;

        let mut emails = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(body) = fetch.body() else {
                warn!(uid = ?fetch.uid, "FETCH response without a body, skipping");
                continue;
            };

            match parse_raw_email(body) {
                Ok(email) => emails.push(email),
                Err(e) => {
                    warn!(uid = ?fetch.uid, error = %e, "Failed to parse message, skipping");
                }
            }
        }

        Ok(emails)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.conn.logout().await
    }
}

/// Parse a raw RFC822 message into the engine's email record.
pub fn parse_raw_email(raw: &[u8]) -> Result<RawEmail> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| BridgeError::Parse(format!("Failed to parse message: {}", e)))?;

    let headers = &parsed.headers;

    let message_id = headers
        .get_first_value("Message-ID")
        .map(|v| trim_angle_brackets(&v))
        .filter(|v| !v.is_empty());

    // In-Reply-To usually holds one id, but some clients emit several;
    // the first is the direct parent, the rest thread like References.
    let mut reply_ids = headers
        .get_first_value("In-Reply-To")
        .map(|v| parse_id_list(&v))
        .unwrap_or_default();
    let in_reply_to = if reply_ids.is_empty() {
        None
    } else {
        Some(reply_ids.remove(0))
    };

    let mut references = reply_ids;
    for id in headers
        .get_first_value("References")
        .map(|v| parse_id_list(&v))
        .unwrap_or_default()
    {
        if !references.contains(&id) {
            references.push(id);
        }
    }

    let (from_address, from_name) = headers
        .get_first_value("From")
        .map(|v| parse_from(&v))
        .unwrap_or_default();

    if from_address.is_empty() {
        return Err(BridgeError::Parse("Message has no sender address".to_string()));
    }

    let subject = headers.get_first_value("Subject").unwrap_or_default();

    let date = headers
        .get_first_value("Date")
        .and_then(|v| mailparse::dateparse(&v).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    let mut text_body = None;
    let mut html_body = None;
    collect_bodies(&parsed, &mut text_body, &mut html_body);

    Ok(RawEmail {
        message_id,
        from_address,
        from_name,
        subject,
        text_body,
        html_body,
        in_reply_to,
        references,
        date,
    })
}

/// First text/plain and text/html leaves of the MIME tree.
fn collect_bodies(part: &ParsedMail, text: &mut Option<String>, html: &mut Option<String>) {
    if part.subparts.is_empty() {
        let mimetype = part.ctype.mimetype.to_lowercase();
        if mimetype == "text/plain" && text.is_none() {
            *text = part.get_body().ok().filter(|b| !b.trim().is_empty());
        } else if mimetype == "text/html" && html.is_none() {
            *html = part.get_body().ok().filter(|b| !b.trim().is_empty());
        }
        return;
    }

    for sub in &part.subparts {
        if text.is_some() && html.is_some() {
            return;
        }
        collect_bodies(sub, text, html);
    }
}

/// Split a References-style header into bare message ids.
fn parse_id_list(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(trim_angle_brackets)
        .filter(|id| !id.is_empty())
        .collect()
}

fn trim_angle_brackets(id: &str) -> String {
    id.trim().trim_matches(|c| c == '<' || c == '>').to_string()
}

/// Extract (address, display name) from a From header value.
fn parse_from(value: &str) -> (String, Option<String>) {
    if let Ok(addrs) = mailparse::addrparse(value) {
        for addr in addrs.iter() {
            if let mailparse::MailAddr::Single(info) = addr {
                return (
                    info.addr.to_lowercase(),
                    info.display_name.clone().filter(|n| !n.is_empty()),
                );
            }
        }
    }
    (value.trim().to_lowercase(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_since_query_format() {
        let since = Utc.with_ymd_and_hms(2026, 8, 23, 14, 30, 0).unwrap();
        assert_eq!(
            since_query("a@x.com", since),
            "FROM \"a@x.com\" SINCE 23-Aug-2026"
        );
    }

    #[test]
    fn test_since_query_escapes_quoted_string_specials() {
        let since = Utc.with_ymd_and_hms(2026, 8, 23, 0, 0, 0).unwrap();
        assert_eq!(
            since_query("a\"b\\c@x.com", since),
            "FROM \"a\\\"b\\\\c@x.com\" SINCE 23-Aug-2026"
        );
    }

    #[test]
    fn test_window_boundary_excludes_older_days() {
        // An email dated 8 days before "now" falls outside a 7-day window:
        // the SINCE date in the query is strictly later than its day.
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let since = now - chrono::Duration::days(7);
        let query = since_query("a@x.com", since);
        assert!(query.ends_with("SINCE 23-Aug-2026"));

        let eight_days_old = now - chrono::Duration::days(8);
        assert!(eight_days_old.date_naive() < since.date_naive());
    }

    #[test]
    fn test_parse_plain_email() {
        let raw = b"Message-ID: <m1@mail.example>\r\n\
            From: Alice Example <Alice@X.com>\r\n\
            To: support@example.com\r\n\
            Subject: Billing issue\r\n\
            Date: Sat, 29 Aug 2026 10:00:00 +0000\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            My invoice looks wrong.\r\n";

        let email = parse_raw_email(raw).unwrap();
        assert_eq!(email.message_id.as_deref(), Some("m1@mail.example"));
        assert_eq!(email.from_address, "alice@x.com");
        assert_eq!(email.from_name.as_deref(), Some("Alice Example"));
        assert_eq!(email.subject, "Billing issue");
        assert_eq!(
            email.text_body.as_deref().map(str::trim),
            Some("My invoice looks wrong.")
        );
        assert!(email.html_body.is_none());
        assert!(email.date.is_some());
        assert!(!email.has_thread_headers());
    }

    #[test]
    fn test_parse_reply_headers() {
        let raw = b"Message-ID: <m2@mail.example>\r\n\
            From: alice@x.com\r\n\
            Subject: Re: Billing issue\r\n\
            In-Reply-To: <m1@mail.example>\r\n\
            References: <root@mail.example> <m1@mail.example>\r\n\
            \r\n\
            Still wrong.\r\n";

        let email = parse_raw_email(raw).unwrap();
        assert_eq!(email.in_reply_to.as_deref(), Some("m1@mail.example"));
        assert_eq!(
            email.references,
            vec!["root@mail.example".to_string(), "m1@mail.example".to_string()]
        );
    }

    #[test]
    fn test_parse_multi_id_in_reply_to_keeps_all_ids() {
        let raw = b"Message-ID: <m5@mail.example>\r\n\
            From: alice@x.com\r\n\
            Subject: Re: hi\r\n\
            In-Reply-To: <a@mail.example> <b@mail.example>\r\n\
            \r\n\
            body\r\n";

        let email = parse_raw_email(raw).unwrap();
        assert_eq!(email.in_reply_to.as_deref(), Some("a@mail.example"));
        assert_eq!(email.thread_ids(), vec!["a@mail.example", "b@mail.example"]);
    }

    #[test]
    fn test_parse_multipart_prefers_each_kind() {
        let raw = b"Message-ID: <m3@mail.example>\r\n\
            From: alice@x.com\r\n\
            Subject: hi\r\n\
            Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
            \r\n\
            --b1\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            plain body\r\n\
            --b1\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <p>html body</p>\r\n\
            --b1--\r\n";

        let email = parse_raw_email(raw).unwrap();
        assert_eq!(email.text_body.as_deref().map(str::trim), Some("plain body"));
        assert_eq!(
            email.html_body.as_deref().map(str::trim),
            Some("<p>html body</p>")
        );
    }

    #[test]
    fn test_parse_missing_sender_is_error() {
        let raw = b"Subject: orphan\r\n\r\nbody\r\n";
        let err = parse_raw_email(raw).unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
    }
}
