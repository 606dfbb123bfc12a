//! Conversation Matching
//!
//! Decides, for one fetched email, whether it belongs to an existing open
//! ticket for the same customer or should start a new one. Signals, in
//! priority order:
//!
//! 1. Header threading: `In-Reply-To`/`References` resolving to a message
//!    already stored under a candidate ticket. Most reliable — mail clients
//!    preserve these headers on reply.
//! 2. Normalized-subject equality against candidate subjects.
//! 3. Headers present but nothing resolved: assume a reply to the
//!    most-recently-updated candidate. Known imprecision, logged at warn.
//! 4. Otherwise: new ticket.
//!
//! The matcher is pure decision logic; callers resolve store lookups into a
//! `ThreadIndex` first.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{RawEmail, Ticket};

/// Outcome of matching one email against a customer's open tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The email continues an existing conversation.
    ExistingTicket(String),
    /// No open conversation fits; start a new one.
    NewTicket,
}

/// Protocol message id -> owning candidate ticket id, built from stored
/// messages for this customer.
pub type ThreadIndex = HashMap<String, String>;

/// Strip leading reply/forward markers and whitespace from a subject.
///
/// Handles repeated markers (`Re: Re: Fwd: x`), case-insensitively, and the
/// bracketed reply counts some clients emit (`Re[2]: x`). Idempotent.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();

    loop {
        let lower = s.to_lowercase();

        let stripped = if let Some(rest) = strip_marker(&lower, s, "re") {
            rest
        } else if let Some(rest) = strip_marker(&lower, s, "fwd") {
            rest
        } else if let Some(rest) = strip_marker(&lower, s, "fw") {
            rest
        } else {
            break;
        };

        s = stripped.trim_start();
    }

    s.to_string()
}

/// Strip one `<marker>:` or `<marker>[N]:` prefix, if present.
fn strip_marker<'a>(lower: &str, original: &'a str, marker: &str) -> Option<&'a str> {
    let rest = lower.strip_prefix(marker)?;
    let consumed = marker.len();

    // Plain "re:" form
    if rest.starts_with(':') {
        return Some(&original[consumed + 1..]);
    }

    // "re[2]:" form
    if rest.starts_with('[') {
        if let Some(close) = rest.find(']') {
            let count = &rest[1..close];
            if !count.is_empty() && count.chars().all(|c| c.is_ascii_digit()) {
                let after = &rest[close + 1..];
                if after.starts_with(':') {
                    return Some(&original[consumed + close + 2..]);
                }
            }
        }
    }

    None
}

/// Match one email against the customer's open tickets.
///
/// `candidates` must be scoped to the same organization + customer with
/// status != CLOSED, ordered most-recently-updated first; ties on normalized
/// subject resolve to the first candidate in that order. `thread_index` maps
/// protocol ids of already-stored messages to the candidate ticket holding
/// them.
pub fn match_conversation(
    email: &RawEmail,
    candidates: &[Ticket],
    thread_index: &ThreadIndex,
) -> MatchResult {
    if candidates.is_empty() {
        return MatchResult::NewTicket;
    }

    // 1. Header threading
    for id in email.thread_ids() {
        if let Some(ticket_id) = thread_index.get(id) {
            if candidates.iter().any(|t| &t.id == ticket_id) {
                debug!(
                    protocol_id = %id,
                    ticket_id = %ticket_id,
                    "Matched by threading header"
                );
                return MatchResult::ExistingTicket(ticket_id.clone());
            }
        }
    }

    // 2. Subject normalization fallback
    let normalized = normalize_subject(&email.subject);
    for ticket in candidates {
        if normalize_subject(&ticket.subject) == normalized {
            debug!(
                ticket_id = %ticket.id,
                subject = %normalized,
                "Matched by normalized subject"
            );
            return MatchResult::ExistingTicket(ticket.id.clone());
        }
    }

    // 3. Headers present but unresolved: best-effort, assume a reply to the
    // most recent open conversation. Misattributes when the customer has
    // several concurrent tickets.
    if email.has_thread_headers() {
        let ticket = &candidates[0];
        warn!(
            ticket_id = %ticket.id,
            customer = %email.from_address,
            "Threading headers did not resolve; falling back to most recent open ticket"
        );
        return MatchResult::ExistingTicket(ticket.id.clone());
    }

    // 4. No signals at all
    MatchResult::NewTicket
}
