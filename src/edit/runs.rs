//! Paragraph lookup and character-exact run splitting.
//!
//! Offsets are counted in characters of the concatenated `w:t` text of a paragraph's direct
//! runs. Splitting works on run children, so tabs, breaks, field characters and the run's
//! attributes survive on whichever side of the cut they sat.

use tracing::debug;

use crate::docx::tree::{NodeData, NodeId, XmlTree};
use crate::docx::vocab::W;
use crate::edit::error::EditError;

/// Which runs contribute to a paragraph's searchable text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Runs outside revision marks.
    Runs,
    /// Also runs inside `w:ins`/`w:del`, including deleted text.
    WithRevisions,
}

const REVISION_MARKS: &[&str] = &["ins", "del", "moveFrom", "moveTo"];

fn is_revision_mark(tree: &XmlTree, id: NodeId) -> bool {
    tree.local_name(id)
        .is_some_and(|l| REVISION_MARKS.contains(&l) && tree.is(id, W, l))
}

/// Runs belonging to `p` (not to a paragraph nested inside it) that fall under `scope`.
fn scoped_runs(tree: &XmlTree, p: NodeId, scope: Scope) -> Vec<NodeId> {
    tree.find_all(p, W, "r")
        .into_iter()
        .filter(|r| {
            for a in tree.ancestors(*r) {
                if a == p {
                    return true;
                }
                if tree.is(a, W, "p") {
                    return false;
                }
                if scope == Scope::Runs && is_revision_mark(tree, a) {
                    return false;
                }
            }
            false
        })
        .collect()
}

pub fn paragraph_text(tree: &XmlTree, p: NodeId, scope: Scope) -> String {
    let mut out = String::new();
    for r in scoped_runs(tree, p, scope) {
        for c in tree.child_elements(r) {
            let text_leaf = tree.is(c, W, "t") || (scope == Scope::WithRevisions && tree.is(c, W, "delText"));
            if text_leaf {
                out.push_str(&tree.text(c));
            }
        }
    }
    out
}

/// The unique paragraph under `body` whose text contains `text`.
pub fn find_paragraph(tree: &XmlTree, body: NodeId, text: &str, scope: Scope) -> Result<NodeId, EditError> {
    let matches: Vec<NodeId> = tree
        .find_all(body, W, "p")
        .into_iter()
        .filter(|p| paragraph_text(tree, *p, scope).contains(text))
        .collect();
    match matches.as_slice() {
        [] => Err(EditError::ParagraphNotFound(text.to_string())),
        [one] => Ok(*one),
        many => Err(EditError::AmbiguousText {
            text: text.to_string(),
            count: many.len(),
        }),
    }
}

pub fn direct_runs(tree: &XmlTree, p: NodeId) -> Vec<NodeId> {
    tree.find_children(p, W, "r")
}

pub fn run_text(tree: &XmlTree, run: NodeId) -> String {
    tree.find_children(run, W, "t")
        .into_iter()
        .map(|t| tree.text(t))
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(b, _)| b).unwrap_or(s.len())
}

/// Character index of the first occurrence of `needle` in `hay`.
fn char_find(hay: &str, needle: &str) -> Option<usize> {
    hay.find(needle).map(|b| char_len(&hay[..b]))
}

pub fn set_preserve(tree: &mut XmlTree, t: NodeId) {
    tree.set_attr(t, "xml:space", "preserve");
}

/// `(run, start, length)` for every direct run of `p`.
fn run_spans(tree: &XmlTree, p: NodeId) -> Vec<(NodeId, usize, usize)> {
    let mut pos = 0;
    direct_runs(tree, p)
        .into_iter()
        .map(|r| {
            let len = char_len(&run_text(tree, r));
            let span = (r, pos, len);
            pos += len;
            span
        })
        .collect()
}

/// Split `run` at character `k` of its text. Zero-width children sitting exactly at `k` stay
/// on the left when `zero_width_left`. Returns false when one side would be empty.
fn split_run(tree: &mut XmlTree, run: NodeId, k: usize, zero_width_left: bool) -> bool {
    let mut right = Vec::new();
    let mut straddling: Option<(NodeId, usize)> = None;
    let mut left_has_content = false;
    let mut c = 0;
    for child in tree.child_elements(run) {
        if tree.is(child, W, "rPr") {
            continue;
        }
        let width = if tree.is(child, W, "t") {
            char_len(&tree.text(child))
        } else {
            0
        };
        let goes_left = if width > 0 {
            if c < k && k < c + width {
                straddling = Some((child, k - c));
                c += width;
                continue;
            }
            c + width <= k
        } else {
            c < k || (c == k && zero_width_left)
        };
        if goes_left {
            left_has_content = true;
        } else {
            right.push(child);
        }
        c += width;
    }
    if straddling.is_none() && (!left_has_content || right.is_empty()) {
        return false;
    }

    let Some(el) = tree.element(run).cloned() else {
        return false;
    };
    let tail = tree.create_node(NodeData::Element(el));
    tree.insert_after(run, tail);
    if let Some(rpr) = tree.find_child(run, W, "rPr") {
        let copy = tree.deep_clone(rpr);
        tree.append_child(tail, copy);
    }
    if let Some((t, off)) = straddling {
        let text = tree.text(t);
        let (head, rest) = text.split_at(byte_offset(&text, off));
        let (head, rest) = (head.to_string(), rest.to_string());
        tree.set_text(t, head);
        set_preserve(tree, t);
        if let Some(t_el) = tree.element(t).cloned() {
            let t2 = tree.create_node(NodeData::Element(t_el));
            tree.set_text(t2, rest);
            set_preserve(tree, t2);
            tree.append_child(tail, t2);
        }
    }
    for child in right {
        tree.append_child(tail, child);
    }
    true
}

/// Make character `k` of the paragraph text fall on a run boundary.
fn ensure_boundary(tree: &mut XmlTree, p: NodeId, k: usize, zero_width_left: bool) {
    let candidates: Vec<(NodeId, usize)> = run_spans(tree, p)
        .into_iter()
        .filter(|(_, start, len)| *len > 0 && *start <= k && k <= start + len)
        .map(|(r, start, _)| (r, k - start))
        .collect();
    for (run, local) in candidates {
        split_run(tree, run, local, zero_width_left);
    }
}

/// Merge `runs` into the first one, keeping its properties, and join adjacent text leaves.
fn merge_runs(tree: &mut XmlTree, runs: &[NodeId]) -> Option<NodeId> {
    let (&first, rest) = runs.split_first()?;
    for &r in rest {
        for child in tree.child_elements(r) {
            if !tree.is(child, W, "rPr") {
                tree.append_child(first, child);
            }
        }
        tree.detach(r);
    }
    let mut prev_t: Option<NodeId> = None;
    for child in tree.child_elements(first) {
        if !tree.is(child, W, "t") {
            prev_t = None;
            continue;
        }
        match prev_t {
            Some(prev) => {
                let joined = tree.text(prev) + &tree.text(child);
                tree.set_text(prev, joined);
                set_preserve(tree, prev);
                tree.detach(child);
            }
            None => prev_t = Some(child),
        }
    }
    Some(first)
}

/// Isolate characters `start..end` of the paragraph text into exactly one run.
pub fn isolate_span(tree: &mut XmlTree, p: NodeId, start: usize, end: usize) -> Option<NodeId> {
    if start >= end {
        return None;
    }
    ensure_boundary(tree, p, end, false);
    ensure_boundary(tree, p, start, true);
    let selected: Vec<NodeId> = run_spans(tree, p)
        .into_iter()
        .filter(|(_, s, len)| {
            *s >= start && s + len <= end && (*len > 0 || (*s > start && *s < end))
        })
        .map(|(r, _, _)| r)
        .collect();
    debug!(start, end, runs = selected.len(), "isolated span");
    merge_runs(tree, &selected)
}

/// Locate `target` in the direct-run text of `p`, optionally inside `context`, and isolate it
/// into a single run.
pub fn find_and_split_text(
    tree: &mut XmlTree,
    p: NodeId,
    target: &str,
    context: Option<&str>,
) -> Result<NodeId, EditError> {
    if target.is_empty() {
        return Err(EditError::TargetNotFound(String::new()));
    }
    let text: String = direct_runs(tree, p).into_iter().map(|r| run_text(tree, r)).collect();

    let start = match context {
        Some(ctx) => {
            let count = text.matches(ctx).count();
            if count != 1 {
                return Err(EditError::ContextNotUnique {
                    context: ctx.to_string(),
                    count,
                });
            }
            match ctx.matches(target).count() {
                0 => {
                    return Err(EditError::TargetNotInContext {
                        target: target.to_string(),
                        context: ctx.to_string(),
                    })
                }
                1 => {}
                count => {
                    return Err(EditError::TargetNotUnique {
                        target: target.to_string(),
                        count,
                    })
                }
            }
            let ctx_at = char_find(&text, ctx).unwrap_or_default();
            ctx_at + char_find(ctx, target).unwrap_or_default()
        }
        None => match text.matches(target).count() {
            0 => return Err(EditError::TargetNotFound(target.to_string())),
            1 => char_find(&text, target).unwrap_or_default(),
            count => {
                return Err(EditError::TargetNotUnique {
                    target: target.to_string(),
                    count,
                })
            }
        },
    };
    isolate_span(tree, p, start, start + char_len(target))
        .ok_or_else(|| EditError::TargetNotFound(target.to_string()))
}

/// Detached copy of `rpr` without its own change record.
fn clone_rpr(tree: &mut XmlTree, rpr: NodeId) -> NodeId {
    let copy = tree.deep_clone(rpr);
    for c in tree.find_children(copy, W, "rPrChange") {
        tree.detach(c);
    }
    copy
}

/// Run properties for text inserted into `p`: the insertion run's, else the first run in the
/// paragraph that has any, else the paragraph style's (following `basedOn`), else empty.
pub fn inherited_rpr(tree: &mut XmlTree, p: NodeId, at: Option<NodeId>, styles: Option<&XmlTree>) -> NodeId {
    if let Some(rpr) = at.and_then(|r| tree.find_child(r, W, "rPr")) {
        return clone_rpr(tree, rpr);
    }
    let first = tree
        .find_all(p, W, "r")
        .into_iter()
        .find_map(|r| tree.find_child(r, W, "rPr"));
    if let Some(rpr) = first {
        return clone_rpr(tree, rpr);
    }
    if let Some(rpr) = styles.and_then(|s| style_rpr(tree, p, s)) {
        return rpr;
    }
    tree.new_element(W, "rPr")
}

fn style_rpr(tree: &mut XmlTree, p: NodeId, styles: &XmlTree) -> Option<NodeId> {
    let root = styles.root()?;
    let mut style_id = tree
        .find_child(p, W, "pPr")
        .and_then(|ppr| tree.find_child(ppr, W, "pStyle"))
        .and_then(|s| tree.ns_attr(s, W, "val"))
        .unwrap_or("Normal")
        .to_string();
    let all = styles.find_all(root, W, "style");
    let mut visited = std::collections::HashSet::new();
    while visited.insert(style_id.clone()) {
        let style = all
            .iter()
            .copied()
            .find(|s| styles.ns_attr(*s, W, "styleId") == Some(style_id.as_str()))?;
        if let Some(rpr) = styles.find_child(style, W, "rPr") {
            return Some(tree.import(styles, rpr));
        }
        style_id = styles
            .find_child(style, W, "basedOn")
            .and_then(|b| styles.ns_attr(b, W, "val"))?
            .to_string();
    }
    debug!(style = %style_id, "cyclic basedOn chain");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::package::fixture::{document, W_NS};
    use crate::docx::xml::{parse_str, write_tree};

    fn doc(body: &str) -> (XmlTree, NodeId) {
        let tree = parse_str("word/document.xml", &document(body));
        let root = tree.root().unwrap();
        let body = tree.find_child(root, W, "body").unwrap();
        (tree, body)
    }

    fn texts(tree: &XmlTree, p: NodeId) -> Vec<String> {
        direct_runs(tree, p).into_iter().map(|r| run_text(tree, r)).collect()
    }

    fn styles(xml: &str) -> XmlTree {
        parse_str(
            "word/styles.xml",
            &format!(r#"<w:styles xmlns:w="{W_NS}">{xml}</w:styles>"#),
        )
    }

    #[test]
    fn split_across_two_runs_is_exact() {
        let (mut tree, body) = doc(r#"<w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>World</w:t></w:r></w:p>"#);
        let p = find_paragraph(&tree, body, "Hello", Scope::Runs).unwrap();
        let run = find_and_split_text(&mut tree, p, "lo Wo", None).unwrap();

        assert_eq!(texts(&tree, p), vec!["Hel", "lo Wo", "rld"]);
        assert_eq!(run_text(&tree, run), "lo Wo");
        assert_eq!(tree.find_children(run, W, "t").len(), 1);
        // Target keeps the first run's (empty) formatting; the tail keeps the bold.
        assert!(tree.find_child(run, W, "rPr").is_none());
        let tail = direct_runs(&tree, p)[2];
        assert!(tree.find_first(tail, W, "b").is_some());
    }

    #[test]
    fn split_inside_single_run() {
        let (mut tree, body) = doc(r#"<w:p><w:r w:rsidR="00AB"><w:rPr><w:i/></w:rPr><w:t>abcdef</w:t></w:r></w:p>"#);
        let p = find_paragraph(&tree, body, "abc", Scope::Runs).unwrap();
        let run = find_and_split_text(&mut tree, p, "cd", None).unwrap();
        assert_eq!(texts(&tree, p), vec!["ab", "cd", "ef"]);
        for r in direct_runs(&tree, p) {
            assert!(tree.find_first(r, W, "i").is_some());
            assert_eq!(tree.ns_attr(r, W, "rsidR"), Some("00AB"));
        }
        assert_eq!(run_text(&tree, run), "cd");
    }

    #[test]
    fn whole_run_match_is_returned_unchanged() {
        let (mut tree, body) = doc(r#"<w:p><w:r><w:t>one</w:t></w:r><w:r><w:t>two</w:t></w:r></w:p>"#);
        let p = find_paragraph(&tree, body, "onetwo", Scope::Runs).unwrap();
        let before = direct_runs(&tree, p);
        let run = find_and_split_text(&mut tree, p, "two", None).unwrap();
        assert_eq!(run, before[1]);
        assert_eq!(texts(&tree, p), vec!["one", "two"]);
    }

    #[test]
    fn multibyte_offsets_are_characters() {
        let (mut tree, body) = doc(r#"<w:p><w:r><w:t>方法一很好</w:t></w:r></w:p>"#);
        let p = find_paragraph(&tree, body, "方法", Scope::Runs).unwrap();
        find_and_split_text(&mut tree, p, "一很", None).unwrap();
        assert_eq!(texts(&tree, p), vec!["方法", "一很", "好"]);
    }

    #[test]
    fn tab_before_target_stays_outside() {
        let (mut tree, body) = doc(r#"<w:p><w:r><w:t>ab</w:t><w:tab/><w:t>cd</w:t></w:r></w:p>"#);
        let p = find_paragraph(&tree, body, "abcd", Scope::Runs).unwrap();
        let run = find_and_split_text(&mut tree, p, "cd", None).unwrap();
        assert!(tree.find_child(run, W, "tab").is_none());
        assert_eq!(texts(&tree, p), vec!["ab", "cd"]);
        let first = direct_runs(&tree, p)[0];
        assert!(tree.find_child(first, W, "tab").is_some());
    }

    #[test]
    fn context_disambiguates() {
        let (mut tree, body) = doc(r#"<w:p><w:r><w:t>the cat and the dog</w:t></w:r></w:p>"#);
        let p = find_paragraph(&tree, body, "cat", Scope::Runs).unwrap();
        assert!(matches!(
            find_and_split_text(&mut tree, p, "the", None),
            Err(EditError::TargetNotUnique { count: 2, .. })
        ));
        assert!(matches!(
            find_and_split_text(&mut tree, p, "the", Some("the")),
            Err(EditError::ContextNotUnique { count: 2, .. })
        ));
        assert!(matches!(
            find_and_split_text(&mut tree, p, "cow", Some("the dog")),
            Err(EditError::TargetNotInContext { .. })
        ));
        assert!(matches!(
            find_and_split_text(&mut tree, p, "bird", None),
            Err(EditError::TargetNotFound(_))
        ));
        find_and_split_text(&mut tree, p, "the", Some("and the dog")).unwrap();
        assert_eq!(texts(&tree, p), vec!["the cat and ", "the", " dog"]);
        let xml = String::from_utf8(write_tree(&tree)).unwrap();
        assert!(xml.contains(r#"<w:t xml:space="preserve">the cat and </w:t>"#));
    }

    #[test]
    fn paragraph_lookup_distinguishes_missing_and_ambiguous() {
        let (tree, body) = doc(r#"<w:p><w:r><w:t>alpha beta</w:t></w:r></w:p><w:p><w:r><w:t>alpha gamma</w:t></w:r></w:p><w:p><w:ins w:id="1"><w:r><w:t>hidden</w:t></w:r></w:ins><w:del w:id="2"><w:r><w:delText>gone</w:delText></w:r></w:del></w:p>"#);
        assert!(matches!(
            find_paragraph(&tree, body, "alpha", Scope::Runs),
            Err(EditError::AmbiguousText { count: 2, .. })
        ));
        assert!(matches!(
            find_paragraph(&tree, body, "delta", Scope::Runs),
            Err(EditError::ParagraphNotFound(_))
        ));
        assert!(find_paragraph(&tree, body, "hidden", Scope::Runs).is_err());
        assert!(find_paragraph(&tree, body, "hidden", Scope::WithRevisions).is_ok());
        assert!(find_paragraph(&tree, body, "gone", Scope::WithRevisions).is_ok());
    }

    #[test]
    fn rpr_inheritance_order() {
        let (mut tree, body) = doc(r#"<w:p><w:r><w:t>plain</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>bold</w:t></w:r></w:p><w:p><w:pPr><w:pStyle w:val="Quote"/></w:pPr><w:r><w:t>styled</w:t></w:r></w:p><w:p><w:pPr><w:pStyle w:val="Loop"/></w:pPr><w:r><w:t>cyclic</w:t></w:r></w:p>"#);
        let st = styles(r#"<w:style w:styleId="Base"><w:rPr><w:color w:val="FF0000"/></w:rPr></w:style><w:style w:styleId="Quote"><w:basedOn w:val="Base"/></w:style><w:style w:styleId="Loop"><w:basedOn w:val="Loop2"/></w:style><w:style w:styleId="Loop2"><w:basedOn w:val="Loop"/></w:style>"#);

        let p1 = find_paragraph(&tree, body, "bold", Scope::Runs).unwrap();
        let plain = direct_runs(&tree, p1)[0];
        let rpr = inherited_rpr(&mut tree, p1, Some(plain), Some(&st));
        assert!(tree.find_child(rpr, W, "b").is_some());

        let p2 = find_paragraph(&tree, body, "styled", Scope::Runs).unwrap();
        let rpr = inherited_rpr(&mut tree, p2, None, Some(&st));
        assert!(tree.find_child(rpr, W, "color").is_some());

        let p3 = find_paragraph(&tree, body, "cyclic", Scope::Runs).unwrap();
        let rpr = inherited_rpr(&mut tree, p3, None, Some(&st));
        assert!(tree.child_elements(rpr).is_empty());
    }
}
