//! Text-level repairs applied before any XML parser sees a part.
//!
//! Duplicate attributes are a fatal well-formedness error for every XML parser, so they are
//! removed here on the raw text. The same goes for characters XML 1.0 forbids outright.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("part {part} is not decodable as {encoding}")]
    Undecodable { part: String, encoding: &'static str },
}

/// Start tags (including self-closing ones) with a well-formed attribute list.
static START_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<([A-Za-z_][\w:.\-]*)((?:\s+[A-Za-z_:][\w:.\-]*\s*=\s*(?:"[^"]*"|'[^']*'))*)(\s*/?)>"#,
    )
    .expect("start tag regex")
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][\w:.\-]*)\s*=\s*("[^"]*"|'[^']*')"#).expect("attribute regex")
});

static DECLARED_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._\-]+)["']"#)
        .expect("encoding regex")
});

/// Decode raw part bytes to text, honouring byte-order marks and the declared encoding.
pub fn decode_part(part: &str, bytes: &[u8]) -> Result<String, ParseError> {
    let (encoding, body): (&'static Encoding, &[u8]) = if let Some(rest) = bytes.strip_prefix(b"\xEF\xBB\xBF") {
        (UTF_8, rest)
    } else if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
        (UTF_16LE, rest)
    } else if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
        (UTF_16BE, rest)
    } else {
        (sniff_declared_encoding(bytes).unwrap_or(UTF_8), bytes)
    };

    let decoded = encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .ok_or_else(|| ParseError::Undecodable {
            part: part.to_string(),
            encoding: encoding.name(),
        })?;
    Ok(decoded.into_owned())
}

fn sniff_declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(256)];
    let head = String::from_utf8_lossy(head);
    let label = DECLARED_ENCODING.captures(&head)?.get(1)?.as_str().to_string();
    let enc = Encoding::for_label(label.as_bytes())?;
    // A UTF-16 label on bytes without a BOM means the declaration lies; ASCII-compatible
    // decoding already got us this far.
    if enc == UTF_16LE || enc == UTF_16BE {
        return None;
    }
    Some(enc)
}

/// Keep only the first occurrence of each attribute name in every start tag.
///
/// Tags without duplicates are left byte-identical.
pub fn fix_duplicate_attributes(xml: &str) -> Cow<'_, str> {
    START_TAG.replace_all(xml, |caps: &regex::Captures<'_>| {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let name = &caps[1];
        let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let closing = caps.get(3).map(|m| m.as_str()).unwrap_or_default();

        let mut seen: Vec<&str> = Vec::new();
        let mut kept: Vec<&str> = Vec::new();
        let mut duplicated = false;
        for m in ATTRIBUTE.captures_iter(attrs) {
            let key = m.get(1).map(|k| k.as_str()).unwrap_or_default();
            if seen.contains(&key) {
                duplicated = true;
                continue;
            }
            seen.push(key);
            kept.push(m.get(0).map(|a| a.as_str()).unwrap_or_default());
        }
        if !duplicated {
            return whole.to_string();
        }
        let slash = if closing.trim().is_empty() { "" } else { "/" };
        if kept.is_empty() {
            format!("<{name}{slash}>")
        } else {
            format!("<{name} {}{slash}>", kept.join(" "))
        }
    })
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\u{9}' | '\u{A}' | '\u{D}' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

/// Drop characters that are never legal in XML 1.0.
pub fn strip_invalid_chars(xml: &str) -> Cow<'_, str> {
    if xml.chars().all(is_xml_char) {
        return Cow::Borrowed(xml);
    }
    Cow::Owned(xml.chars().filter(|c| is_xml_char(*c)).collect())
}

/// All text-level repairs, in the order they must run.
pub fn repair(xml: &str) -> String {
    let xml = xml.strip_prefix('\u{FEFF}').unwrap_or(xml);
    let xml = strip_invalid_chars(xml);
    fix_duplicate_attributes(&xml).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_duplicates_is_unchanged() {
        let xml = r#"<root attr1="val1"   attr2='val2'>content</root>"#;
        assert_eq!(fix_duplicate_attributes(xml), xml);
    }

    #[test]
    fn keeps_first_of_duplicated_attribute() {
        let xml = r#"<w:comment w:id="0" w:author="A" w:id="1">"#;
        let out = fix_duplicate_attributes(xml);
        assert_eq!(out, r#"<w:comment w:id="0" w:author="A">"#);
        assert_eq!(out.matches("w:id=").count(), 1);
    }

    #[test]
    fn handles_multiple_duplicates_and_self_closing() {
        let xml = r#"<root><elem a="1" b="2" a="3" b="4"/><other name="x"/></root>"#;
        let out = fix_duplicate_attributes(xml);
        assert_eq!(out, r#"<root><elem a="1" b="2"/><other name="x"/></root>"#);
    }

    #[test]
    fn attribute_values_may_contain_angle_brackets() {
        let xml = r#"<a x="1 > 0" x="2">t</a>"#;
        assert_eq!(fix_duplicate_attributes(xml), r#"<a x="1 > 0">t</a>"#);
    }

    #[test]
    fn declaration_and_end_tags_untouched() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?><a/></a>"#;
        assert_eq!(fix_duplicate_attributes(xml), xml);
    }

    #[test]
    fn repair_strips_bom_and_control_chars() {
        let xml = "\u{FEFF}<a>x\u{1}y</a>";
        assert_eq!(repair(xml), "<a>xy</a>");
    }

    #[test]
    fn decodes_utf16_with_bom() {
        let text = "<a>é</a>";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_part("t.xml", &bytes).unwrap(), text);
    }

    #[test]
    fn decodes_declared_legacy_encoding() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"windows-1252\"?><a>\xE9</a>";
        let out = decode_part("t.xml", bytes).unwrap();
        assert!(out.ends_with("<a>é</a>"));
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let err = decode_part("word/document.xml", b"<a>\xC3\x28</a>").unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }
}
