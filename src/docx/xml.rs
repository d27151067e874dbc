use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::docx::tolerant::{self, ParseError};
use crate::docx::tree::{Element, NodeData, NodeId, XmlDecl, XmlTree};

/// Parse a part tolerantly: text-level repair first, then a recovering event walk.
///
/// Only undecodable bytes fail. Mismatched end tags close up to the nearest matching open
/// element (or are dropped), unclosed elements are closed at end of input, and a syntax error
/// ends the walk with whatever was read so far.
pub fn parse_part(name: &str, bytes: &[u8]) -> Result<XmlTree, ParseError> {
    let text = tolerant::decode_part(name, bytes)?;
    Ok(parse_str(name, &text))
}

pub fn parse_str(name: &str, text: &str) -> XmlTree {
    let repaired = tolerant::repair(text);
    let mut reader = Reader::from_str(&repaired);
    {
        let cfg = reader.config_mut();
        cfg.trim_text(false);
        cfg.check_end_names = false;
        cfg.allow_unmatched_ends = true;
        cfg.check_comments = false;
    }

    let mut tree = XmlTree::new();
    tree.decl = None;
    let mut stack: Vec<NodeId> = vec![tree.document()];
    let mut recovered = 0usize;

    loop {
        let ev = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) => {
                warn!(part = name, pos = reader.buffer_position(), error = %e, "xml syntax error; keeping partial tree");
                recovered += 1;
                break;
            }
        };
        let parent = *stack.last().unwrap_or(&tree.document());
        match ev {
            Event::Eof => break,
            Event::Decl(d) => {
                let version = d
                    .version()
                    .map(|v| lossy(v))
                    .unwrap_or_else(|_| "1.0".to_string());
                let standalone = d
                    .standalone()
                    .and_then(|r| r.ok())
                    .map(lossy);
                tree.decl = Some(XmlDecl { version, standalone });
            }
            Event::Start(s) => {
                let id = tree.create_node(NodeData::Element(element_from(&s, &mut recovered)));
                tree.append_child(parent, id);
                stack.push(id);
            }
            Event::Empty(s) => {
                let id = tree.create_node(NodeData::Element(element_from(&s, &mut recovered)));
                tree.append_child(parent, id);
            }
            Event::End(e) => {
                let end = lossy(e.name().as_ref());
                match stack
                    .iter()
                    .rposition(|n| tree.name(*n) == Some(end.as_str()))
                {
                    Some(pos) => {
                        if pos + 1 != stack.len() {
                            recovered += 1;
                        }
                        stack.truncate(pos);
                    }
                    None => recovered += 1,
                }
            }
            Event::Text(t) => {
                let txt = match t.unescape() {
                    Ok(s) => s.into_owned(),
                    Err(_) => {
                        recovered += 1;
                        lossy(&*t)
                    }
                };
                if parent == tree.document() && txt.trim().is_empty() {
                    continue;
                }
                let id = tree.create_node(NodeData::Text(txt));
                tree.append_child(parent, id);
            }
            Event::CData(t) => {
                let id = tree.create_node(NodeData::CData(lossy(t.into_inner())));
                tree.append_child(parent, id);
            }
            Event::Comment(t) => {
                let id = tree.create_node(NodeData::Comment(lossy(t.into_inner())));
                tree.append_child(parent, id);
            }
            Event::PI(t) => {
                let id = tree.create_node(NodeData::Pi(lossy(&*t)));
                tree.append_child(parent, id);
            }
            Event::DocType(t) => {
                let id = tree.create_node(NodeData::DocType(lossy(t.into_inner())));
                tree.append_child(parent, id);
            }
        }
    }

    if stack.len() > 1 {
        recovered += stack.len() - 1;
    }
    if recovered > 0 {
        warn!(part = name, recovered, "recovered malformed xml");
    } else {
        debug!(part = name, "parsed xml");
    }
    tree
}

fn element_from(s: &BytesStart<'_>, recovered: &mut usize) -> Element {
    let mut el = Element::new(lossy(s.name().as_ref()));
    for a in s.attributes().with_checks(false) {
        let Ok(a) = a else {
            *recovered += 1;
            continue;
        };
        let key = lossy(a.key.as_ref());
        if el.attrs.iter().any(|(k, _)| *k == key) {
            continue;
        }
        let val = match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => {
                *recovered += 1;
                lossy(a.value.as_ref())
            }
        };
        el.attrs.push((key, val));
    }
    el
}

fn lossy(raw: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(raw.as_ref()).into_owned()
}

/// Escape markup characters of `s` into `out`. In attribute values quotes and the whitespace
/// controls are escaped too, since a literal newline would be normalized to a space on read.
fn escape_into(out: &mut Vec<u8>, s: &str, attr: bool) {
    let mut plain = 0;
    for (i, b) in s.bytes().enumerate() {
        let entity: &[u8] = match b {
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            b'>' => b"&gt;",
            b'"' if attr => b"&quot;",
            b'\t' if attr => b"&#9;",
            b'\n' if attr => b"&#10;",
            b'\r' if attr => b"&#13;",
            _ => continue,
        };
        out.extend_from_slice(&s.as_bytes()[plain..i]);
        out.extend_from_slice(entity);
        plain = i + 1;
    }
    out.extend_from_slice(&s.as_bytes()[plain..]);
}

/// Serialize a tree as UTF-8 with an XML declaration.
pub fn write_tree(tree: &XmlTree) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();

    fn write_node(out: &mut Vec<u8>, tree: &XmlTree, id: NodeId) {
        match tree.data(id) {
            NodeData::Document => {
                for c in tree.children(id) {
                    write_node(out, tree, *c);
                }
            }
            NodeData::Element(el) => {
                out.extend_from_slice(b"<");
                out.extend_from_slice(el.name.as_bytes());
                for (k, v) in &el.attrs {
                    out.extend_from_slice(b" ");
                    out.extend_from_slice(k.as_bytes());
                    out.extend_from_slice(b"=\"");
                    escape_into(out, v, true);
                    out.extend_from_slice(b"\"");
                }
                let children = tree.children(id);
                if children.is_empty() {
                    out.extend_from_slice(b"/>");
                    return;
                }
                out.extend_from_slice(b">");
                for c in children {
                    write_node(out, tree, *c);
                }
                out.extend_from_slice(b"</");
                out.extend_from_slice(el.name.as_bytes());
                out.extend_from_slice(b">");
            }
            NodeData::Text(text) => escape_into(out, text, false),
            NodeData::CData(text) => {
                // CDATA must remain unescaped.
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            NodeData::Comment(text) => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            NodeData::Pi(content) => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            NodeData::DocType(text) => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b">");
            }
        }
    }

    let decl = tree.decl.clone().unwrap_or_default();
    out.extend_from_slice(b"<?xml version=\"");
    out.extend_from_slice(decl.version.as_bytes());
    out.extend_from_slice(b"\" encoding=\"UTF-8\"");
    if let Some(sa) = decl.standalone.as_deref() {
        out.extend_from_slice(b" standalone=\"");
        out.extend_from_slice(sa.as_bytes());
        out.extend_from_slice(b"\"");
    }
    out.extend_from_slice(b"?>\r\n");
    write_node(&mut out, tree, tree.document());
    out
}

#[cfg(test)]
mod tests {
    use super::{escape_into, parse_part, parse_str, write_tree};
    use crate::docx::vocab::W;

    const W_DECL: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    #[test]
    fn write_preserves_attr_entity_refs() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><root xmlns:o="urn:test" o:gfxdata="A&#xD;&#xA;B"/>"#;
        let tree = parse_part("test.xml", xml).expect("parse xml");
        let s = String::from_utf8(write_tree(&tree)).expect("utf8");

        assert!(s.contains(r#"o:gfxdata="A&#13;&#10;B""#));
        assert!(!s.contains(r#"o:gfxdata="A&amp;#xD;"#));
    }

    #[test]
    fn duplicate_attributes_keep_first_value() {
        let xml = format!(
            r#"<?xml version="1.0"?><w:comments {W_DECL}><w:comment w:id="0" w:author="A" w:id="1"><w:p/></w:comment></w:comments>"#
        );
        let tree = parse_str("word/comments.xml", &xml);
        let root = tree.root().unwrap();
        let comments = tree.find_all(root, W, "comment");
        assert_eq!(comments.len(), 1);
        let el = tree.element(comments[0]).unwrap();
        assert_eq!(el.attr("w:id"), Some("0"));
        assert_eq!(el.attrs.iter().filter(|(k, _)| k == "w:id").count(), 1);
    }

    #[test]
    fn unclosed_tags_are_closed_at_eof() {
        let xml = format!(r#"<w:document {W_DECL}><w:body><w:p><w:r><w:t>hi</w:t>"#);
        let tree = parse_str("word/document.xml", &xml);
        let root = tree.root().unwrap();
        let t = tree.find_all(root, W, "t");
        assert_eq!(t.len(), 1);
        assert_eq!(tree.text(t[0]), "hi");
        let out = String::from_utf8(write_tree(&tree)).unwrap();
        assert!(out.ends_with("<w:t>hi</w:t></w:r></w:p></w:body></w:document>"));
    }

    #[test]
    fn mismatched_end_tag_closes_to_matching_ancestor() {
        let xml = format!(r#"<w:document {W_DECL}><w:body><w:p><w:r></w:p><w:p/></w:body></w:document>"#);
        let tree = parse_str("word/document.xml", &xml);
        let root = tree.root().unwrap();
        let body = tree.find_first(root, W, "body").unwrap();
        assert_eq!(tree.find_children(body, W, "p").len(), 2);
    }

    #[test]
    fn stray_end_tag_is_ignored() {
        let xml = format!(r#"<w:document {W_DECL}></w:bogus><w:body/></w:document>"#);
        let tree = parse_str("word/document.xml", &xml);
        let root = tree.root().unwrap();
        assert!(tree.find_child(root, W, "body").is_some());
    }

    #[test]
    fn bom_prefix_is_ignored() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(b"<a><b/></a>");
        let tree = parse_part("x.xml", &bytes).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.name(root), Some("a"));
    }

    #[test]
    fn roundtrip_keeps_text_and_escapes() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {W_DECL}><w:body><w:p><w:r><w:t xml:space="preserve"> a &amp; b </w:t></w:r></w:p></w:body></w:document>"#
        );
        let tree = parse_str("word/document.xml", &xml);
        let out = String::from_utf8(write_tree(&tree)).unwrap();
        assert!(out.contains(r#"<w:t xml:space="preserve"> a &amp; b </w:t>"#));
        let again = parse_str("word/document.xml", &out);
        assert!(tree.same_structure(&again));
    }

    #[test]
    fn attribute_controls_survive_as_references() {
        let mut out = Vec::new();
        escape_into(&mut out, "a\t\"b\"<é>\n", true);
        assert_eq!(String::from_utf8(out).unwrap(), "a&#9;&quot;b&quot;&lt;é&gt;&#10;");
        let mut out = Vec::new();
        escape_into(&mut out, "\"x\" & y\n", false);
        assert_eq!(String::from_utf8(out).unwrap(), "\"x\" &amp; y\n");
    }
}
