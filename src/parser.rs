//! Internal module for parsing fetched messages.

use crate::error::{Error, Result};
use crate::mailbox::CandidateMessage;
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{parse_mail, DispositionType, MailHeaderMap, MailParseError, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

static SCRIPT_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")
        .expect("valid regex")
});
static LINE_BREAK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6]|table)\s*>").expect("valid regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#(\d+)|#[xX]([0-9A-Fa-f]+)|([a-zA-Z][a-zA-Z0-9]*));").expect("valid regex")
});

/// Converts an IMAP fetch result into a [`CandidateMessage`].
///
/// Malformed messages are logged and skipped rather than failing the whole
/// backend, so one broken mail cannot hide a valid code behind it.
pub(crate) fn candidate_from_fetch(
    uid: u32,
    message: &async_imap::types::Fetch,
) -> Option<CandidateMessage> {
    let Some(raw) = message.body() else {
        debug!(uid, "Message has no body");
        return None;
    };

    let internal_date = message.internal_date().map(|d| d.with_timezone(&Utc));

    match parse_candidate(uid, raw, internal_date) {
        Ok(candidate) => Some(candidate),
        Err(e) => {
            warn!(uid, error = %e, "Failed to parse email, skipping message");
            None
        }
    }
}

/// Parses a raw RFC 5322 message.
///
/// `received_at` comes from the `Date` header, falling back to
/// `internal_date`. A message with neither is rejected.
pub(crate) fn parse_candidate(
    uid: u32,
    raw: &[u8],
    internal_date: Option<DateTime<Utc>>,
) -> Result<CandidateMessage> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { source })?;

    let received_at = header_date(&parsed)
        .or(internal_date)
        .ok_or(Error::ParseEmail {
            source: MailParseError::Generic("message has neither a Date header nor INTERNALDATE"),
        })?;

    let body_text = extract_body_text(&parsed).map_err(|source| Error::ExtractBody { source })?;

    Ok(CandidateMessage {
        uid,
        sender_address: sender_address(&parsed).unwrap_or_default(),
        subject_line: parsed
            .headers
            .get_first_value("Subject")
            .unwrap_or_default(),
        received_at,
        body_text,
    })
}

fn sender_address(parsed: &ParsedMail<'_>) -> Option<String> {
    let from = parsed.headers.get_first_value("From")?;
    match mailparse::addrparse(&from) {
        Ok(list) => list
            .extract_single_info()
            .map(|info| info.addr.trim().to_lowercase())
            .filter(|addr| addr.contains('@')),
        Err(e) => {
            debug!(error = %e, "Unparseable From header");
            None
        }
    }
}

fn header_date(parsed: &ParsedMail<'_>) -> Option<DateTime<Utc>> {
    let date = parsed.headers.get_first_value("Date")?;
    let timestamp = mailparse::dateparse(&date).ok()?;
    Utc.timestamp_opt(timestamp, 0).single()
}

/// Extracts text content from a parsed email.
///
/// `text/plain` wins over `text/html`; HTML is reduced to text. Attachments
/// are ignored.
fn extract_body_text(parsed: &ParsedMail<'_>) -> std::result::Result<String, MailParseError> {
    if parsed.subparts.is_empty() {
        let body = parsed.get_body()?;
        return Ok(if parsed.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            html_to_text(&body)
        } else {
            body
        });
    }

    let mut plain = None;
    let mut html = None;
    collect_text_parts(parsed, &mut plain, &mut html);

    if let Some(part) = plain {
        let body = part.get_body()?;
        if !body.trim().is_empty() {
            return Ok(body);
        }
    }
    if let Some(part) = html {
        return Ok(html_to_text(&part.get_body()?));
    }

    Ok(String::new())
}

fn collect_text_parts<'a, 'b>(
    part: &'b ParsedMail<'a>,
    plain: &mut Option<&'b ParsedMail<'a>>,
    html: &mut Option<&'b ParsedMail<'a>>,
) {
    if part.subparts.is_empty() {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            return;
        }
        let mimetype = part.ctype.mimetype.to_lowercase();
        if mimetype == "text/plain" && plain.is_none() {
            *plain = Some(part);
        } else if mimetype == "text/html" && html.is_none() {
            *html = Some(part);
        }
        return;
    }

    for sub in &part.subparts {
        collect_text_parts(sub, plain, html);
    }
}

/// Reduces HTML to readable text.
pub(crate) fn html_to_text(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, " ");
    let text = LINE_BREAK_TAG.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let decoded = if let Some(decimal) = caps.get(1) {
                decimal.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(char::from_u32)
            } else {
                caps.get(3).and_then(|named| match named.as_str() {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                })
            };
            match decoded {
                // non-breaking spaces would defeat the word boundaries in the extractor
                Some('\u{a0}') => " ".to_string(),
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
