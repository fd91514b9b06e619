//! MIME helpers: attachment extraction, payload stripping and body text.
//!
//! Pure functions over raw message bytes. Storage and persistence live in
//! the pipeline stages that call these.

use std::collections::HashSet;
use std::sync::LazyLock;

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use regex::Regex;

use crate::error::MailError;
use crate::mail::model::AttachmentMeta;

/// One attachment-flagged part with its decoded payload.
#[derive(Debug, Clone)]
pub struct ExtractedAttachment {
    pub meta: AttachmentMeta,
    pub payload: Vec<u8>,
}

/// Result of splitting a message into attachments and a stripped document.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub attachments: Vec<ExtractedAttachment>,
    /// The original document with every attachment body removed.
    /// Headers and MIME structure are kept.
    pub stripped: Vec<u8>,
}

/// Separate attachment and inline parts from a raw message.
///
/// Every part whose `Content-Disposition` is `attachment` or `inline` is
/// returned (multipart containers excluded). `key` only labels errors.
pub fn extract_attachments(raw: &[u8], key: &str) -> Result<Extraction, MailError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::MimeParse { key: key.to_string() })?;

    let mut attachments = Vec::new();
    let mut spans = Vec::new();
    let mut used_names = HashSet::new();

    for (index, part) in message.parts.iter().enumerate() {
        if !is_attachment(part) {
            continue;
        }

        let filename = derive_filename(part, index, &mut used_names);
        let meta = AttachmentMeta {
            filename,
            content_type: content_type_of(part),
            transfer_encoding: raw_header(raw, part, "Content-Transfer-Encoding"),
            content_id: raw_header(raw, part, "Content-ID"),
            attachment_id: raw_header(raw, part, "X-Attachment-Id"),
        };

        attachments.push(ExtractedAttachment {
            meta,
            payload: part.contents().to_vec(),
        });
        spans.push((part.offset_body as usize, part.offset_end as usize));
    }

    Ok(Extraction {
        attachments,
        stripped: remove_spans(raw, spans),
    })
}

fn is_attachment(part: &MessagePart) -> bool {
    if matches!(part.body, PartType::Multipart(_)) {
        return false;
    }
    part.content_disposition().is_some_and(|d| {
        let disposition = d.ctype();
        disposition.eq_ignore_ascii_case("attachment") || disposition.eq_ignore_ascii_case("inline")
    })
}

fn content_type_of(part: &MessagePart) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
            None => ct.ctype().to_string(),
        })
        .map(|ct| ct.to_ascii_lowercase())
        .unwrap_or_else(|| "text/plain".to_string())
}

/// Pick a unique, path-safe filename for a part.
///
/// Unnamed parts get `attachment_{index}`; a name already used in this
/// message is prefixed with the part index so nothing gets overwritten.
fn derive_filename(part: &MessagePart, index: usize, used: &mut HashSet<String>) -> String {
    let candidate = part
        .attachment_name()
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("attachment_{index}"));

    let filename = if used.contains(&candidate) {
        format!("{index}_{candidate}")
    } else {
        candidate
    };
    used.insert(filename.clone());
    filename
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "." | ".." => String::new(),
        _ => cleaned,
    }
}

/// Raw, unfolded value of a part header as it appears in the document.
fn raw_header(raw: &[u8], part: &MessagePart, name: &str) -> Option<String> {
    let header = part
        .headers
        .iter()
        .find(|h| h.name.as_str().eq_ignore_ascii_case(name))?;
    let bytes = raw.get(header.offset_start as usize..header.offset_end as usize)?;
    let value = String::from_utf8_lossy(bytes)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!value.is_empty()).then_some(value)
}

/// Copy `raw` leaving out the given byte ranges.
fn remove_spans(raw: &[u8], mut spans: Vec<(usize, usize)>) -> Vec<u8> {
    spans.retain(|(start, end)| start < end && *end <= raw.len());
    spans.sort_unstable();

    let mut out = Vec::with_capacity(raw.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if end <= cursor {
            continue;
        }
        let start = start.max(cursor);
        out.extend_from_slice(&raw[cursor..start]);
        cursor = end;
    }
    out.extend_from_slice(&raw[cursor..]);
    out
}

// ── Body text ───────────────────────────────────────────────────────

/// Extract the readable body of a message, preferring plain text over HTML.
pub fn body_text(raw: &[u8], key: &str) -> Result<String, MailError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::MimeParse { key: key.to_string() })?;

    if let Some(text) = message.body_text(0) {
        return Ok(text.into_owned());
    }
    if let Some(html) = message.body_html(0) {
        return Ok(strip_html(&html));
    }
    Err(MailError::NoBody { key: key.to_string() })
}

static BRACKETED_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<https?://[^>]*>").expect("valid regex"));
static QUOTE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n>").expect("valid regex"));
static QUOTE_MARKERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">+").expect("valid regex"));
static INLINE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Clean a body for summarization and cut it to `char_limit` characters.
pub fn normalize_body(text: &str, char_limit: usize) -> String {
    let text = BRACKETED_URL.replace_all(text, "");
    let text = QUOTE_LINE.replace_all(&text, "");
    let text = QUOTE_MARKERS.replace_all(&text, "");
    let text = INLINE_WHITESPACE.replace_all(&text, " ");
    text.chars().take(char_limit).collect()
}

fn strip_html(html: &str) -> String {
    HTML_TAG.replace_all(html, " ").to_string()
}
