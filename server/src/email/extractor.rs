use google_gmail1::api::{MessagePart, MessagePartHeader};
use regex::Regex;

lazy_static::lazy_static!(
    static ref RE_WHITESPACE: Regex = Regex::new(r"[\r\t\n]+").unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(r" {2,}").unwrap();
    static ref RE_NON_ASCII: Regex = Regex::new(r"[^\x20-\x7E]").unwrap();
    static ref RE_DIVIDERS: Regex = Regex::new(r"[-=_]{3,}").unwrap();
    static ref RE_HTTP_LINK: Regex = Regex::new(r"https?:\/\/(www\.)?[-a-zA-Z0-9@:%._\+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b([-a-zA-Z0-9()@:%_\+.~#?&//=]*)").unwrap();
);

const HTML_RENDER_WIDTH: usize = 400;

struct TextPart<'a> {
    mime: &'a str,
    data: &'a [u8],
}

/// Walk the payload tree and append every inline text part to the
/// accumulator. Attachments (parts with a filename) are skipped.
fn collect_text_parts<'a>(part: &'a MessagePart, acc: &mut Vec<TextPart<'a>>) {
    let is_attachment = part.filename.as_deref().is_some_and(|f| !f.is_empty());

    if !is_attachment {
        if let (Some(mime), Some(data)) = (
            part.mime_type.as_deref(),
            part.body.as_ref().and_then(|b| b.data.as_deref()),
        ) {
            if mime.starts_with("text/") && !data.is_empty() {
                acc.push(TextPart { mime, data });
            }
        }
    }

    if let Some(children) = &part.parts {
        for child in children {
            collect_text_parts(child, acc);
        }
    }
}

fn normalize_html(raw: &str) -> String {
    let b = RE_HTTP_LINK.replace_all(raw, "[LINK]");
    let b: String = html2text::from_read(b.as_bytes(), HTML_RENDER_WIDTH);
    // whitespace runs collapse before the non-ascii strip eats the newlines
    let b = RE_WHITESPACE.replace_all(&b, " ");
    let b = RE_NON_ASCII.replace_all(&b, "");
    let b = RE_DIVIDERS.replace_all(&b, " ");
    let b = RE_LONG_SPACE.replace_all(&b, " ");
    b.trim().to_string()
}

fn normalize_plain(raw: &str) -> String {
    let b = RE_HTTP_LINK.replace_all(raw, "");
    let b = RE_WHITESPACE.replace_all(&b, " ");
    let b = RE_NON_ASCII.replace_all(&b, "");
    let b = RE_LONG_SPACE.replace_all(&b, " ");
    b.trim().to_string()
}

/// Extract the best readable text from a message payload.
///
/// Collects every inline text part, preferring text/html over text/plain
/// when any HTML part exists. HTML is rendered to plain text with anchors
/// reduced to their visible text and URLs collapsed; plaintext gets bare
/// URLs stripped. Output is whitespace-normalized. Returns `("", "")` when
/// no usable text part exists.
pub fn extract_text(payload: &MessagePart) -> (String, String) {
    let mut parts = Vec::new();
    collect_text_parts(payload, &mut parts);

    let html: Vec<&TextPart> = parts.iter().filter(|p| p.mime == "text/html").collect();

    let (selected, mime) = if !html.is_empty() {
        (html, "text/html")
    } else {
        let plain: Vec<&TextPart> = parts
            .iter()
            .filter(|p| p.mime.starts_with("text/"))
            .collect();
        if plain.is_empty() {
            return (String::new(), String::new());
        }
        (plain, "text/plain")
    };

    let raw = selected
        .iter()
        .map(|p| String::from_utf8_lossy(p.data).into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    let text = if mime == "text/html" {
        normalize_html(&raw)
    } else {
        normalize_plain(&raw)
    };

    if text.is_empty() {
        return (String::new(), String::new());
    }

    (text, mime.to_string())
}

/// Case-insensitive header lookup on a payload's header list
pub fn header_value<'a>(
    headers: Option<&'a Vec<MessagePartHeader>>,
    name: &str,
) -> Option<&'a str> {
    headers?
        .iter()
        .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .and_then(|h| h.value.as_deref())
}
