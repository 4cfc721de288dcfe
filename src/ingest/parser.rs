//! Per-message email parsing.
//!
//! Parses a single raw MIME message (already split from its enclosing MBOX
//! envelope by [`super::chunker`]) into a [`ParsedEmail`]. Built on
//! `mailparse` for RFC 5322 header access and address-list parsing, the same
//! approach used elsewhere in this codebase for MIME handling.
//!
//! Differs from a strict RFC 5322 validator in the ways SPEC_FULL.md §4.1.1
//! calls for: a missing or invalid `Date` falls back to "now" rather than
//! rejecting the message, and a missing `Message-ID` is synthesized rather
//! than rejected, since a message lacking either is still ingestible.

use chrono::{DateTime, Utc};
use mailparse::parse_mail;
use thiserror::Error;

const MAX_BODY_CHARS: usize = 50_000;

#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub message_id: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub from_name: String,
    pub from_email: String,
    pub body: String,
    pub body_html: Option<String>,
    pub to_addrs: Vec<(String, String)>,
    pub cc_addrs: Vec<(String, String)>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub attachments: Vec<ParsedAttachment>,
}

/// A non-text part found one level deep in a multipart message, carrying a
/// filename or an explicit `attachment` disposition (SPEC_FULL.md §4.3 step 6).
#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ParseEmailError {
    #[error("failed to parse MIME: {0}")]
    MimeParse(#[from] mailparse::MailParseError),
    #[error("missing or invalid From address")]
    MissingFromEmail,
}

fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

fn normalize_message_id(msg_id: Option<String>) -> Option<String> {
    let raw = msg_id?;
    let trimmed = raw.trim().trim_start_matches('<').trim_end_matches('>');
    let sanitized = sanitize_text(trimmed);
    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

fn synthesize_message_id() -> String {
    let timestamp = Utc::now().timestamp_micros();
    let random: u64 = rand_u64();
    format!("generated-{timestamp}-{random:016x}")
}

fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}

fn parse_email_addresses(header_value: &str) -> Vec<(String, String)> {
    header_value
        .split(',')
        .filter_map(|token| {
            let addrs = mailparse::addrparse(token.trim()).ok()?;
            match addrs.iter().next()? {
                mailparse::MailAddr::Single(info) => {
                    let name = info.display_name.clone().unwrap_or_default();
                    Some((sanitize_text(&name), info.addr.to_lowercase()))
                }
                mailparse::MailAddr::Group(group) => group.addrs.first().map(|info| {
                    let name = info.display_name.clone().unwrap_or_default();
                    (sanitize_text(&name), info.addr.to_lowercase())
                }),
            }
        })
        .filter(|(_, email)| !email.is_empty())
        .collect()
}

fn extract_references(header_value: &str) -> Vec<String> {
    header_value
        .split_whitespace()
        .filter_map(|token| {
            let trimmed = token.trim_start_matches('<').trim_end_matches('>');
            let sanitized = sanitize_text(trimmed);
            (!sanitized.is_empty()).then_some(sanitized)
        })
        .collect()
}

/// Decode RFC 2047 encoded words (`=?charset?B/Q?text?=`) in a header value.
/// `B` is base64; `Q` is quoted-printable with `_` standing in for space.
pub fn decode_rfc2047(input: &str) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let mut out = String::new();
    let mut rest = input;

    while let Some(start) = rest.find("=?") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(q1) = tail.find('?') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let after_charset = &tail[q1 + 1..];
        let Some(q2) = after_charset.find('?') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let encoding = &after_charset[..q2];
        let after_encoding = &after_charset[q2 + 1..];
        let Some(end) = after_encoding.find("?=") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let encoded_text = &after_encoding[..end];

        let decoded = match encoding.to_ascii_uppercase().as_str() {
            "B" => STANDARD
                .decode(encoded_text)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok()),
            "Q" => Some(decode_quoted_printable_word(encoded_text)),
            _ => None,
        };

        match decoded {
            Some(text) => out.push_str(&text),
            None => out.push_str(&rest[start..start + 2 + q1 + 1 + q2 + 1 + end + 2]),
        }

        rest = &after_encoding[end + 2..];
    }

    out.push_str(rest);
    out
}

fn decode_quoted_printable_word(text: &str) -> String {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                if let Ok(value) = u8::from_str_radix(&text[i + 1..i + 3], 16) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a single raw MIME message into a [`ParsedEmail`].
///
/// Rejects only when `from_email` is missing or contains no `@`, matching
/// SPEC_FULL.md §4.1's "reject (return none) when `from_email` is missing or
/// contains no `@`" — every other field degrades to a sensible default
/// rather than failing the whole message.
pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail, ParseEmailError> {
    let parsed = parse_mail(raw).map_err(|e| {
        log::debug!("failed to parse MIME: {}", e);
        ParseEmailError::MimeParse(e)
    })?;

    let message_id = normalize_message_id(parsed.headers.get_first_value("Message-ID"))
        .unwrap_or_else(synthesize_message_id);

    let raw_subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_else(|| "(No Subject)".to_string());
    let subject = sanitize_text(&decode_rfc2047(&raw_subject));

    let date = parse_email_date(parsed.headers.get_first_value("Date"));

    let from_str = parsed.headers.get_first_value("From").unwrap_or_default();
    let (from_name, from_email) = if let Ok(addrs) = mailparse::addrparse(&from_str) {
        match addrs.iter().next() {
            Some(mailparse::MailAddr::Single(info)) => {
                let name = info.display_name.clone().unwrap_or_default();
                (sanitize_text(&name), info.addr.to_lowercase())
            }
            _ => (String::new(), String::new()),
        }
    } else {
        (String::new(), String::new())
    };

    if from_email.is_empty() || !from_email.contains('@') {
        log::debug!("message {} missing or invalid from_email, rejecting", message_id);
        return Err(ParseEmailError::MissingFromEmail);
    }

    let body = extract_body(&parsed);
    let body: String = sanitize_text(&body).chars().take(MAX_BODY_CHARS).collect();
    let body_html = extract_html_body(&parsed);
    let attachments = extract_attachments(&parsed);

    let to_addrs = parsed
        .headers
        .get_first_value("To")
        .map(|v| parse_email_addresses(&v))
        .unwrap_or_default();
    let cc_addrs = parsed
        .headers
        .get_first_value("Cc")
        .map(|v| parse_email_addresses(&v))
        .unwrap_or_default();

    let in_reply_to = normalize_message_id(parsed.headers.get_first_value("In-Reply-To"));
    let references = parsed
        .headers
        .get_first_value("References")
        .map(|v| extract_references(&v))
        .unwrap_or_default();

    log::trace!("parsed: {} - {}", message_id, subject);

    Ok(ParsedEmail {
        message_id,
        subject,
        date,
        from_name,
        from_email,
        body,
        body_html,
        to_addrs,
        cc_addrs,
        in_reply_to,
        references,
        attachments,
    })
}

fn extract_body(parsed: &mailparse::ParsedMail) -> String {
    if parsed.subparts.is_empty() {
        return parsed.get_body().unwrap_or_default();
    }

    for part in &parsed.subparts {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            let body = part.get_body().unwrap_or_default();
            if !body.is_empty() {
                return body;
            }
        }
    }

    parsed.get_body().unwrap_or_default()
}

fn extract_html_body(parsed: &mailparse::ParsedMail) -> Option<String> {
    if parsed.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        return parsed.get_body().ok().filter(|b| !b.is_empty());
    }

    for part in &parsed.subparts {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            if let Ok(body) = part.get_body() {
                if !body.is_empty() {
                    return Some(body);
                }
            }
        }
    }

    None
}

/// One level deep only, matching the parser's one-level multipart handling
/// elsewhere: any subpart that isn't `text/plain`/`text/html` and carries a
/// filename (via `Content-Disposition` or `Content-Type`'s `name` parameter)
/// is treated as an attachment.
fn extract_attachments(parsed: &mailparse::ParsedMail) -> Vec<ParsedAttachment> {
    parsed
        .subparts
        .iter()
        .filter_map(|part| {
            let mimetype = &part.ctype.mimetype;
            if mimetype.eq_ignore_ascii_case("text/plain") || mimetype.eq_ignore_ascii_case("text/html") {
                return None;
            }
            let filename = part.get_content_disposition().params.get("filename").cloned().or_else(|| {
                part.ctype.params.get("name").cloned()
            })?;
            let bytes = part.get_body_raw().ok()?;
            if bytes.is_empty() {
                return None;
            }
            Some(ParsedAttachment {
                filename: sanitize_text(&filename),
                content_type: mimetype.clone(),
                bytes,
            })
        })
        .collect()
}

fn parse_email_date(raw_date: Option<String>) -> DateTime<Utc> {
    let Some(raw) = raw_date else {
        return Utc::now();
    };
    if raw.trim().is_empty() {
        return Utc::now();
    }
    dateparser::parse(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_text_strips_nulls_and_trims() {
        assert_eq!(sanitize_text("hello\0world"), "helloworld");
        assert_eq!(sanitize_text("  test  "), "test");
    }

    #[test]
    fn normalize_message_id_strips_brackets() {
        assert_eq!(
            normalize_message_id(Some("<test@example.com>".to_string())),
            Some("test@example.com".to_string())
        );
        assert_eq!(normalize_message_id(Some(String::new())), None);
        assert_eq!(normalize_message_id(None), None);
    }

    #[test]
    fn extract_references_splits_on_whitespace() {
        let refs = extract_references("<msg1@example.com> <msg2@example.com>");
        assert_eq!(refs, vec!["msg1@example.com", "msg2@example.com"]);
    }

    #[test]
    fn rfc2047_subject_decodes() {
        assert_eq!(decode_rfc2047("=?UTF-8?B?SGVsbG8=?= world"), "Hello world");
    }

    #[test]
    fn rfc2047_quoted_printable_decodes_underscore_as_space() {
        assert_eq!(decode_rfc2047("=?UTF-8?Q?Hello_world?="), "Hello world");
    }

    #[test]
    fn parse_email_rejects_missing_from_address() {
        let raw = concat!(
            "Message-ID: <no-from@test>\r\n",
            "Subject: No From\r\n",
            "Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "\r\n",
            "Body\r\n"
        );
        let err = parse_email(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseEmailError::MissingFromEmail));
    }

    #[test]
    fn parse_email_synthesizes_message_id_when_absent() {
        let raw = concat!(
            "Subject: No Message-Id\r\n",
            "From: Tester <tester@example.com>\r\n",
            "Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "\r\n",
            "Body\r\n"
        );
        let parsed = parse_email(raw.as_bytes()).expect("parses");
        assert!(parsed.message_id.starts_with("generated-"));
    }

    #[test]
    fn parse_email_falls_back_to_now_on_missing_date() {
        let raw = concat!(
            "Message-ID: <missing-date@test>\r\n",
            "Subject: Missing Date\r\n",
            "From: Tester <tester@example.com>\r\n",
            "\r\n",
            "Body\r\n"
        );
        let before = Utc::now();
        let parsed = parse_email(raw.as_bytes()).expect("parses");
        assert!(parsed.date >= before);
    }

    #[test]
    fn parse_email_selects_first_text_plain_part() {
        let raw = concat!(
            "Message-ID: <multipart@test>\r\n",
            "Subject: Multipart\r\n",
            "From: Tester <tester@example.com>\r\n",
            "Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain body\r\n",
            "--b\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--b--\r\n"
        );
        let parsed = parse_email(raw.as_bytes()).expect("parses");
        assert_eq!(parsed.body, "plain body");
    }

    #[test]
    fn parse_email_extracts_html_part_alongside_plain_text() {
        let raw = concat!(
            "Message-ID: <multipart-html@test>\r\n",
            "Subject: Multipart\r\n",
            "From: Tester <tester@example.com>\r\n",
            "Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain body\r\n",
            "--b\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--b--\r\n"
        );
        let parsed = parse_email(raw.as_bytes()).expect("parses");
        assert_eq!(parsed.body, "plain body");
        assert_eq!(parsed.body_html.as_deref(), Some("<p>html body</p>\r\n"));
    }

    #[test]
    fn parse_email_extracts_one_level_attachment() {
        let raw = concat!(
            "Message-ID: <with-attachment@test>\r\n",
            "Subject: Report\r\n",
            "From: Tester <tester@example.com>\r\n",
            "Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "see attached\r\n",
            "--b\r\n",
            "Content-Type: text/csv; name=\"report.csv\"\r\n",
            "Content-Disposition: attachment; filename=\"report.csv\"\r\n",
            "\r\n",
            "a,b,c\r\n",
            "--b--\r\n"
        );
        let parsed = parse_email(raw.as_bytes()).expect("parses");
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "report.csv");
        assert_eq!(parsed.attachments[0].content_type, "text/csv");
    }

    #[test]
    fn parse_email_truncates_body_to_50000_chars() {
        let long_body = "a".repeat(60_000);
        let raw = format!(
            "Message-ID: <long@test>\r\nSubject: Long\r\nFrom: Tester <tester@example.com>\r\nDate: Mon, 1 Jan 2024 00:00:00 +0000\r\n\r\n{}\r\n",
            long_body
        );
        let parsed = parse_email(raw.as_bytes()).expect("parses");
        assert_eq!(parsed.body.chars().count(), MAX_BODY_CHARS);
    }
}
