//! Comment threads.
//!
//! A comment lives in five parts at once: the body in `comments.xml`, thread state in
//! `commentsExtended.xml` (keyed by paraId), the paraId to durableId map in `commentsIds.xml`,
//! the UTC date in `commentsExtensible.xml` (keyed by durableId), and its author in
//! `people.xml`. The anchor triple in the main document binds it to a text range. Every public
//! operation here updates all of them inside one session transaction.

use tracing::{debug, warn};

use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::vocab::{Ns, W, W14, W15, W16CEX, W16CID};
use crate::edit::error::EditError;
use crate::edit::parts::{
    ensure_comment_content_types, ensure_comment_relationships, COMMENTS, COMMENTS_EXTENDED,
    COMMENTS_EXTENSIBLE, COMMENTS_IDS, PEOPLE,
};
use crate::edit::runs::{self, set_preserve, Scope};
use crate::edit::session::EditSession;

/// A comment as listed in `comments.xml`: its id and the paraId of its last paragraph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentEntry {
    pub id: u32,
    pub para_id: Option<String>,
}

fn comment_para_id(tree: &XmlTree, comment: NodeId) -> Option<String> {
    tree.find_all(comment, W, "p")
        .into_iter()
        .rev()
        .find_map(|p| tree.ns_attr(p, W14, "paraId").map(str::to_string))
}

fn has_id(tree: &XmlTree, el: NodeId, ns: Ns, local: &str, value: &str) -> bool {
    tree.ns_attr(el, ns, local) == Some(value)
}

/// Detach every root-level descendant `ns:local` whose `ns:key` equals `value`. Returns the
/// values of `ns:collect` on the removed elements.
fn remove_keyed(
    tree: &mut XmlTree,
    ns: Ns,
    local: &str,
    key: &str,
    value: &str,
    collect: Option<&str>,
) -> Vec<String> {
    let Some(root) = tree.root() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in tree.find_all(root, ns, local) {
        if !has_id(tree, el, ns, key, value) {
            continue;
        }
        if let Some(c) = collect.and_then(|c| tree.ns_attr(el, ns, c)) {
            out.push(c.to_string());
        }
        tree.detach(el);
    }
    out
}

fn text_run(tree: &mut XmlTree, rsid: &str, text: &str) -> NodeId {
    let r = tree.new_element(W, "r");
    tree.set_ns_attr(r, W, "rsidR", rsid);
    let t = tree.new_element(W, "t");
    tree.set_text(t, text);
    if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
        set_preserve(tree, t);
    }
    tree.append_child(r, t);
    r
}

fn comment_reference_style(tree: &mut XmlTree) -> NodeId {
    let rpr = tree.new_element(W, "rPr");
    let style = tree.new_element(W, "rStyle");
    tree.set_ns_attr(style, W, "val", "CommentReference");
    tree.append_child(rpr, style);
    rpr
}

/// Comment body paragraph: an `annotationRef` run, then one run per line with `w:br` runs
/// between lines.
fn build_comment_paragraph(tree: &mut XmlTree, text: &str, para_id: &str, text_id: &str, rsid: &str) -> NodeId {
    let p = tree.new_element(W, "p");
    tree.set_ns_attr(p, W14, "paraId", para_id);
    tree.set_ns_attr(p, W14, "textId", text_id);
    for attr in ["rsidR", "rsidRDefault", "rsidP"] {
        tree.set_ns_attr(p, W, attr, rsid);
    }

    let anno = tree.new_element(W, "r");
    tree.set_ns_attr(anno, W, "rsidR", rsid);
    let rpr = comment_reference_style(tree);
    tree.append_child(anno, rpr);
    let mark = tree.new_element(W, "annotationRef");
    tree.append_child(anno, mark);
    tree.append_child(p, anno);

    let lines: Vec<&str> = text.split('\n').collect();
    for (i, line) in lines.iter().enumerate() {
        if !line.is_empty() {
            let r = text_run(tree, rsid, line);
            tree.append_child(p, r);
        }
        if i + 1 < lines.len() {
            let r = tree.new_element(W, "r");
            tree.set_ns_attr(r, W, "rsidR", rsid);
            let br = tree.new_element(W, "br");
            tree.append_child(r, br);
            tree.append_child(p, r);
        }
    }
    p
}

fn root_of(tree: &XmlTree, part: &str) -> Result<NodeId, EditError> {
    tree.root().ok_or_else(|| EditError::MissingPart(part.to_string()))
}

impl EditSession {
    /// Every comment in `comments.xml`, in document order.
    pub fn comments(&mut self) -> Result<Vec<CommentEntry>, EditError> {
        let Some(tree) = self.parts.get(COMMENTS)? else {
            return Ok(Vec::new());
        };
        let Some(root) = tree.root() else {
            return Ok(Vec::new());
        };
        Ok(tree
            .find_all(root, W, "comment")
            .into_iter()
            .filter_map(|c| {
                let id = tree.ns_attr(c, W, "id")?.trim().parse().ok()?;
                Some(CommentEntry {
                    id,
                    para_id: comment_para_id(tree, c),
                })
            })
            .collect())
    }

    fn next_comment_id(&mut self) -> Result<u32, EditError> {
        match self.comments()?.iter().map(|c| c.id).max() {
            Some(max) => max.checked_add(1).ok_or(EditError::IdsExhausted("comment")),
            None => Ok(0),
        }
    }

    fn reserve_comment_ids(&mut self) -> Result<(), EditError> {
        let mut seen = Vec::new();
        if let Some(tree) = self.parts.get(COMMENTS)? {
            if let Some(root) = tree.root() {
                for p in tree.find_all(root, W, "p") {
                    for attr in ["paraId", "textId"] {
                        if let Some(v) = tree.ns_attr(p, W14, attr) {
                            seen.push(v.to_string());
                        }
                    }
                }
            }
        }
        if let Some(tree) = self.parts.get(COMMENTS_IDS)? {
            if let Some(root) = tree.root() {
                for c in tree.find_all(root, W16CID, "commentId") {
                    if let Some(v) = tree.ns_attr(c, W16CID, "durableId") {
                        seen.push(v.to_string());
                    }
                }
            }
        }
        for v in seen {
            self.ids.reserve(&v);
        }
        Ok(())
    }

    fn anchor_marker(&mut self, local: &str, id: u32) -> NodeId {
        let el = self.doc.new_element(W, local);
        self.doc.set_ns_attr(el, W, "id", id.to_string());
        el
    }

    fn reference_run(&mut self, id: u32) -> NodeId {
        let r = self.doc.new_element(W, "r");
        let rpr = comment_reference_style(&mut self.doc);
        self.doc.append_child(r, rpr);
        let reference = self.anchor_marker("commentReference", id);
        self.doc.append_child(r, reference);
        r
    }

    /// Append the comment to all five comment parts and make sure the package refers to them.
    fn write_comment_entries(&mut self, id: u32, text: &str, parent_para_id: Option<&str>) -> Result<(), EditError> {
        self.reserve_comment_ids()?;
        let para_id = self.ids.para_id();
        let text_id = self.ids.para_id();
        let durable_id = self.ids.durable_id();
        let rsid = self.ids.rsid();
        let date = self.clock.now();
        let author = self.author.clone();
        let initials = self.initials.clone();

        {
            let tree = self.parts.comment_part_mut(COMMENTS)?;
            let root = root_of(tree, COMMENTS)?;
            let c = tree.new_element(W, "comment");
            tree.set_ns_attr(c, W, "id", id.to_string());
            tree.set_ns_attr(c, W, "author", author.as_str());
            tree.set_ns_attr(c, W, "date", date.as_str());
            tree.set_ns_attr(c, W, "initials", initials.as_str());
            let p = build_comment_paragraph(tree, text, &para_id, &text_id, &rsid);
            tree.append_child(c, p);
            tree.append_child(root, c);
        }
        self.register_rsid(&rsid)?;

        {
            let tree = self.parts.comment_part_mut(COMMENTS_EXTENDED)?;
            let root = root_of(tree, COMMENTS_EXTENDED)?;
            let ex = tree.new_element(W15, "commentEx");
            tree.set_ns_attr(ex, W15, "paraId", para_id.as_str());
            if let Some(parent) = parent_para_id {
                tree.set_ns_attr(ex, W15, "paraIdParent", parent);
            }
            tree.set_ns_attr(ex, W15, "done", "0");
            tree.append_child(root, ex);
        }
        {
            let tree = self.parts.comment_part_mut(COMMENTS_IDS)?;
            let root = root_of(tree, COMMENTS_IDS)?;
            let cid = tree.new_element(W16CID, "commentId");
            tree.set_ns_attr(cid, W16CID, "paraId", para_id.as_str());
            tree.set_ns_attr(cid, W16CID, "durableId", durable_id.as_str());
            tree.append_child(root, cid);
        }
        {
            let tree = self.parts.comment_part_mut(COMMENTS_EXTENSIBLE)?;
            let root = root_of(tree, COMMENTS_EXTENSIBLE)?;
            let cex = tree.new_element(W16CEX, "commentExtensible");
            tree.set_ns_attr(cex, W16CEX, "durableId", durable_id.as_str());
            tree.set_ns_attr(cex, W16CEX, "dateUtc", date.as_str());
            tree.append_child(root, cex);
        }
        {
            let tree = self.parts.comment_part_mut(PEOPLE)?;
            let root = root_of(tree, PEOPLE)?;
            let known = tree
                .find_all(root, W15, "person")
                .into_iter()
                .any(|p| has_id(tree, p, W15, "author", &author));
            if !known {
                let person = tree.new_element(W15, "person");
                tree.set_ns_attr(person, W15, "author", author.as_str());
                let presence = tree.new_element(W15, "presenceInfo");
                tree.set_ns_attr(presence, W15, "providerId", "None");
                tree.set_ns_attr(presence, W15, "userId", author.as_str());
                tree.append_child(person, presence);
                tree.append_child(root, person);
            }
        }

        ensure_comment_relationships(&mut self.parts)?;
        ensure_comment_content_types(&mut self.parts)?;
        debug!(id, para_id = %para_id, durable_id = %durable_id, "wrote comment entries");
        Ok(())
    }

    /// Comment on the paragraph containing `paragraph`. With `highlight`, only that text
    /// (disambiguated by `context`) is anchored; otherwise every run of the paragraph is.
    /// Returns the new comment id.
    pub fn add_comment(
        &mut self,
        paragraph: &str,
        text: &str,
        highlight: Option<&str>,
        context: Option<&str>,
    ) -> Result<u32, EditError> {
        self.transaction(|s| {
            let p = s.find_paragraph(paragraph, Scope::Runs)?;
            let (first, last) = match highlight {
                Some(h) => {
                    let run = runs::find_and_split_text(&mut s.doc, p, h, context)?;
                    (run, run)
                }
                None => {
                    let all = runs::direct_runs(&s.doc, p);
                    match (all.first(), all.last()) {
                        (Some(f), Some(l)) => (*f, *l),
                        _ => return Err(EditError::EmptyParagraph),
                    }
                }
            };

            let id = s.next_comment_id()?;
            let start = s.anchor_marker("commentRangeStart", id);
            s.doc.insert_before(first, start);
            let end = s.anchor_marker("commentRangeEnd", id);
            s.doc.insert_after(last, end);
            let reference = s.reference_run(id);
            s.doc.insert_after(end, reference);

            s.write_comment_entries(id, text, None)?;
            Ok(id)
        })
    }

    /// Reply to comment `parent`. The reply is anchored right next to the parent's anchors.
    pub fn reply_comment(&mut self, parent: u32, text: &str) -> Result<u32, EditError> {
        self.transaction(|s| {
            let parent_para = s
                .comments()?
                .into_iter()
                .find(|c| c.id == parent)
                .and_then(|c| c.para_id)
                .ok_or(EditError::ParentNotFound(parent))?;
            let id = s.next_comment_id()?;
            s.anchor_reply(parent, id);
            s.write_comment_entries(id, text, Some(&parent_para))?;
            Ok(id)
        })
    }

    fn find_marker(&self, local: &str, id: u32) -> Option<NodeId> {
        let root = self.doc.root()?;
        let id = id.to_string();
        self.doc
            .find_all(root, W, local)
            .into_iter()
            .find(|m| has_id(&self.doc, *m, W, "id", &id))
    }

    fn anchor_reply(&mut self, parent: u32, id: u32) {
        let (Some(start), Some(end)) = (
            self.find_marker("commentRangeStart", parent),
            self.find_marker("commentRangeEnd", parent),
        ) else {
            warn!(parent, reply = id, "parent comment has no anchors; reply left unanchored");
            return;
        };
        let reply_start = self.anchor_marker("commentRangeStart", id);
        self.doc.insert_after(start, reply_start);

        // The reply's end and reference follow the parent's reference run when there is one.
        let parent_id = parent.to_string();
        let mut after = end;
        if let Some(container) = self.doc.parent(end) {
            let siblings = self.doc.children(container).to_vec();
            let pos = siblings.iter().position(|c| *c == end).unwrap_or(siblings.len());
            let reference = siblings[pos..].iter().skip(1).copied().find(|sib| {
                self.doc
                    .find_all(*sib, W, "commentReference")
                    .into_iter()
                    .any(|r| has_id(&self.doc, r, W, "id", &parent_id))
            });
            if let Some(r) = reference {
                after = r;
            }
        }
        let reply_end = self.anchor_marker("commentRangeEnd", id);
        self.doc.insert_after(after, reply_end);
        let reference = self.reference_run(id);
        self.doc.insert_after(reply_end, reference);
    }

    /// Mark comment `id` as done. A package without `commentsExtended.xml` has no thread
    /// state to change.
    pub fn resolve_comment(&mut self, id: u32) -> Result<(), EditError> {
        self.transaction(|s| {
            let entry = s
                .comments()?
                .into_iter()
                .find(|c| c.id == id)
                .ok_or(EditError::CommentNotFound(id))?;
            let Some(para_id) = entry.para_id else {
                warn!(id, "comment has no paraId; nothing to resolve");
                return Ok(());
            };
            if !s.parts.exists(COMMENTS_EXTENDED) {
                return Ok(());
            }
            let Some(tree) = s.parts.get_mut(COMMENTS_EXTENDED)? else {
                return Ok(());
            };
            let root = root_of(tree, COMMENTS_EXTENDED)?;
            let ex = tree
                .find_all(root, W15, "commentEx")
                .into_iter()
                .find(|e| has_id(tree, *e, W15, "paraId", &para_id));
            match ex {
                Some(ex) => tree.set_ns_attr(ex, W15, "done", "1"),
                None => warn!(id, para_id = %para_id, "comment has no thread entry"),
            }
            Ok(())
        })
    }

    /// Delete comment `id` and its direct replies. Returns every deleted id, target first.
    pub fn delete_comment(&mut self, id: u32) -> Result<Vec<u32>, EditError> {
        self.transaction(|s| {
            let all = s.comments()?;
            let target = all
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or(EditError::CommentNotFound(id))?;

            let mut doomed = vec![target.clone()];
            if let Some(parent_para) = &target.para_id {
                let child_paras: Vec<String> = match s.parts.get(COMMENTS_EXTENDED)? {
                    Some(tree) => match tree.root() {
                        Some(root) => tree
                            .find_all(root, W15, "commentEx")
                            .into_iter()
                            .filter(|e| has_id(tree, *e, W15, "paraIdParent", parent_para))
                            .filter_map(|e| tree.ns_attr(e, W15, "paraId").map(str::to_string))
                            .collect(),
                        None => Vec::new(),
                    },
                    None => Vec::new(),
                };
                for c in &all {
                    let is_reply = c.para_id.as_ref().is_some_and(|p| child_paras.contains(p));
                    if is_reply && c.id != id && !doomed.contains(c) {
                        doomed.push(c.clone());
                    }
                }
            }

            for entry in &doomed {
                s.remove_comment(entry)?;
            }
            let ids: Vec<u32> = doomed.iter().map(|c| c.id).collect();
            debug!(?ids, "deleted comments");
            Ok(ids)
        })
    }

    fn remove_anchors(&mut self, id: u32) {
        let Some(root) = self.doc.root() else { return };
        let id = id.to_string();
        for local in ["commentRangeStart", "commentRangeEnd"] {
            for m in self.doc.find_all(root, W, local) {
                if has_id(&self.doc, m, W, "id", &id) {
                    self.doc.detach(m);
                }
            }
        }
        for reference in self.doc.find_all(root, W, "commentReference") {
            if !has_id(&self.doc, reference, W, "id", &id) {
                continue;
            }
            let run = self.doc.parent(reference).filter(|r| self.doc.is(*r, W, "r"));
            let only_reference = run.is_some_and(|r| {
                self.doc.child_elements(r).into_iter().all(|c| {
                    c == reference || self.doc.is(c, W, "rPr")
                })
            });
            match run {
                Some(r) if only_reference => self.doc.detach(r),
                _ => self.doc.detach(reference),
            }
        }
    }

    fn remove_comment(&mut self, entry: &CommentEntry) -> Result<(), EditError> {
        self.remove_anchors(entry.id);
        if let Some(tree) = self.parts.get_mut(COMMENTS)? {
            remove_keyed(tree, W, "comment", "id", &entry.id.to_string(), None);
        }
        let Some(para_id) = &entry.para_id else {
            return Ok(());
        };
        if self.parts.exists(COMMENTS_EXTENDED) {
            if let Some(tree) = self.parts.get_mut(COMMENTS_EXTENDED)? {
                remove_keyed(tree, W15, "commentEx", "paraId", para_id, None);
            }
        }
        let mut durable = Vec::new();
        if self.parts.exists(COMMENTS_IDS) {
            if let Some(tree) = self.parts.get_mut(COMMENTS_IDS)? {
                durable = remove_keyed(tree, W16CID, "commentId", "paraId", para_id, Some("durableId"));
            }
        }
        if !durable.is_empty() && self.parts.exists(COMMENTS_EXTENSIBLE) {
            if let Some(tree) = self.parts.get_mut(COMMENTS_EXTENSIBLE)? {
                for d in &durable {
                    remove_keyed(tree, W16CEX, "commentExtensible", "durableId", d, None);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::package::fixture;
    use crate::docx::package::{CONTENT_TYPES, DOCUMENT, DOCUMENT_RELS};
    use crate::docx::rules::{validate_file, RuleSettings};
    use crate::docx::vocab::{PKG_RELS, PKG_TYPES};
    use crate::edit::session::testing::{options, read_part};
    use crate::edit::session::edit_docx;

    const BODY: &str = r#"<w:p><w:r><w:t xml:space="preserve">The quick </w:t></w:r><w:r><w:t>brown fox</w:t></w:r></w:p><w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p><w:p/>"#;

    fn open(dir: &tempfile::TempDir) -> (std::path::PathBuf, EditSession) {
        let input = fixture::docx(dir.path(), "in.docx", BODY);
        let session = EditSession::open(&input, options()).unwrap();
        (input, session)
    }

    fn count_with_id(tree: &XmlTree, ns: Ns, local: &str, key: &str, value: &str) -> usize {
        let root = tree.root().unwrap();
        tree.find_all(root, ns, local)
            .into_iter()
            .filter(|e| tree.ns_attr(*e, ns, key) == Some(value))
            .count()
    }

    fn anchor_names(tree: &XmlTree, p: NodeId) -> Vec<String> {
        tree.child_elements(p)
            .into_iter()
            .map(|c| {
                let local = tree.local_name(c).unwrap_or_default().to_string();
                if local == "r" {
                    if tree.find_first(c, W, "commentReference").is_some() {
                        return "ref".to_string();
                    }
                    return runs::run_text(tree, c);
                }
                local
            })
            .collect()
    }

    #[test]
    fn highlighted_comment_anchors_exact_text() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut s) = open(&dir);
        let id = s.add_comment("quick", "Check this", Some("quick brown"), None).unwrap();
        assert_eq!(id, 0);
        let p = s.find_paragraph("quick", Scope::Runs).unwrap();
        assert_eq!(
            anchor_names(&s.doc, p),
            vec!["The ", "commentRangeStart", "quick brown", "commentRangeEnd", "ref", " fox"]
        );
        assert_eq!(s.add_comment("Second", "again", None, None).unwrap(), 1);
    }

    #[test]
    fn comment_without_highlight_spans_all_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut s) = open(&dir);
        s.add_comment("quick", "whole", None, None).unwrap();
        let p = s.find_paragraph("quick", Scope::Runs).unwrap();
        assert_eq!(
            anchor_names(&s.doc, p),
            vec!["commentRangeStart", "The quick ", "brown fox", "commentRangeEnd", "ref"]
        );
    }

    #[test]
    fn empty_paragraph_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture::docx(dir.path(), "in.docx", r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr></w:p>"#);
        let mut s = EditSession::open(&input, options()).unwrap();
        let before = s.doc.clone();
        assert!(matches!(s.add_comment("", "x", None, None), Err(EditError::EmptyParagraph)));
        assert!(s.doc.same_structure(&before));
        assert!(!s.parts.exists(COMMENTS));
    }

    #[test]
    fn add_writes_all_parts_and_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture::docx(dir.path(), "in.docx", BODY);
        let out = dir.path().join("out.docx");
        edit_docx(&input, &out, options(), |s| s.add_comment("Second", "line one\nline two", None, None)).unwrap();

        let comments = read_part(&out, COMMENTS).unwrap();
        let root = comments.root().unwrap();
        let c = comments.find_first(root, W, "comment").unwrap();
        assert_eq!(comments.ns_attr(c, W, "author"), Some("Ada Lovelace"));
        assert_eq!(comments.ns_attr(c, W, "initials"), Some("AL"));
        assert_eq!(comments.ns_attr(c, W, "date"), Some("2024-05-06T07:08:09Z"));
        assert!(comments.find_first(c, W, "annotationRef").is_some());
        assert_eq!(comments.find_all(c, W, "br").len(), 1);
        let para_id = comment_para_id(&comments, c).unwrap();

        let ext = read_part(&out, COMMENTS_EXTENDED).unwrap();
        assert_eq!(count_with_id(&ext, W15, "commentEx", "paraId", &para_id), 1);
        let ids = read_part(&out, COMMENTS_IDS).unwrap();
        assert_eq!(count_with_id(&ids, W16CID, "commentId", "paraId", &para_id), 1);
        let people = read_part(&out, PEOPLE).unwrap();
        assert_eq!(count_with_id(&people, W15, "person", "author", "Ada Lovelace"), 1);
        assert!(read_part(&out, COMMENTS_EXTENSIBLE).is_some());

        let rels = read_part(&out, DOCUMENT_RELS).unwrap();
        assert_eq!(rels.find_all(rels.root().unwrap(), PKG_RELS, "Relationship").len(), 7);
        let types = read_part(&out, CONTENT_TYPES).unwrap();
        assert_eq!(types.find_all(types.root().unwrap(), PKG_TYPES, "Override").len(), 6);

        let settings = read_part(&out, "word/settings.xml").unwrap();
        assert_eq!(settings.find_all(settings.root().unwrap(), W, "rsid").len(), 1);

        let report = validate_file(&out, &RuleSettings::default());
        assert!(report.passed(), "{:?}", report.errors);
    }

    #[test]
    fn add_then_delete_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture::docx(dir.path(), "in.docx", BODY);
        let mid = dir.path().join("mid.docx");
        let out = dir.path().join("out.docx");
        let id = edit_docx(&input, &mid, options(), |s| s.add_comment("quick", "note", Some("fox"), None)).unwrap();

        let comments = read_part(&mid, COMMENTS).unwrap();
        let c = comments.find_first(comments.root().unwrap(), W, "comment").unwrap();
        let para_id = comment_para_id(&comments, c).unwrap();
        let ids = read_part(&mid, COMMENTS_IDS).unwrap();
        let cid = ids.find_first(ids.root().unwrap(), W16CID, "commentId").unwrap();
        let durable = ids.ns_attr(cid, W16CID, "durableId").unwrap().to_string();

        let deleted = edit_docx(&mid, &out, options(), |s| s.delete_comment(id)).unwrap();
        assert_eq!(deleted, vec![id]);

        let doc = read_part(&out, DOCUMENT).unwrap();
        let key = id.to_string();
        for local in ["commentRangeStart", "commentRangeEnd", "commentReference"] {
            assert_eq!(count_with_id(&doc, W, local, "id", &key), 0, "{local}");
        }
        let comments = read_part(&out, COMMENTS).unwrap();
        assert_eq!(count_with_id(&comments, W, "comment", "id", &key), 0);
        let ext = read_part(&out, COMMENTS_EXTENDED).unwrap();
        assert_eq!(count_with_id(&ext, W15, "commentEx", "paraId", &para_id), 0);
        let ids = read_part(&out, COMMENTS_IDS).unwrap();
        assert_eq!(count_with_id(&ids, W16CID, "commentId", "paraId", &para_id), 0);
        let cex = read_part(&out, COMMENTS_EXTENSIBLE).unwrap();
        assert_eq!(count_with_id(&cex, W16CEX, "commentExtensible", "durableId", &durable), 0);
        // Paragraph text survives the anchor removal.
        let root = doc.root().unwrap();
        let body = doc.find_child(root, W, "body").unwrap();
        assert!(runs::find_paragraph(&doc, body, "The quick brown fox", Scope::Runs).is_ok());
    }

    #[test]
    fn reply_is_anchored_next_to_parent_and_deleted_with_it() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut s) = open(&dir);
        let parent = s.add_comment("quick", "parent", Some("brown"), None).unwrap();
        let reply = s.reply_comment(parent, "reply").unwrap();
        assert_eq!(reply, parent + 1);

        let p = s.find_paragraph("quick", Scope::Runs).unwrap();
        assert_eq!(
            anchor_names(&s.doc, p),
            vec![
                "The quick ",
                "commentRangeStart",
                "commentRangeStart",
                "brown",
                "commentRangeEnd",
                "ref",
                "commentRangeEnd",
                "ref",
                " fox"
            ]
        );
        let ext = s.parts.get(COMMENTS_EXTENDED).unwrap().unwrap();
        let root = ext.root().unwrap();
        assert_eq!(
            ext.find_all(root, W15, "commentEx")
                .into_iter()
                .filter(|e| ext.ns_attr(*e, W15, "paraIdParent").is_some())
                .count(),
            1
        );

        let deleted = s.delete_comment(parent).unwrap();
        assert_eq!(deleted, vec![parent, reply]);
        assert!(s.comments().unwrap().is_empty());
        assert_eq!(anchor_names(&s.doc, p), vec!["The quick ", "brown", " fox"]);
    }

    #[test]
    fn reply_to_unknown_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut s) = open(&dir);
        assert!(matches!(s.reply_comment(7, "x"), Err(EditError::ParentNotFound(7))));
        assert!(!s.parts.exists(COMMENTS));
    }

    #[test]
    fn resolve_marks_done() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut s) = open(&dir);
        let id = s.add_comment("Second", "x", None, None).unwrap();
        s.resolve_comment(id).unwrap();
        let ext = s.parts.get(COMMENTS_EXTENDED).unwrap().unwrap();
        let root = ext.root().unwrap();
        let ex = ext.find_first(root, W15, "commentEx").unwrap();
        assert_eq!(ext.ns_attr(ex, W15, "done"), Some("1"));
        assert!(matches!(s.resolve_comment(42), Err(EditError::CommentNotFound(42))));
        assert!(matches!(s.delete_comment(42), Err(EditError::CommentNotFound(42))));
    }

    #[test]
    fn author_is_listed_once_in_people() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut s) = open(&dir);
        s.add_comment("Second", "a", None, None).unwrap();
        s.add_comment("quick", "b", None, None).unwrap();
        s.set_author("Grace Hopper", None);
        s.add_comment("quick", "c", Some("fox"), None).unwrap();
        let people = s.parts.get(PEOPLE).unwrap().unwrap();
        let root = people.root().unwrap();
        assert_eq!(people.find_all(root, W15, "person").len(), 2);
    }

    #[test]
    fn exhausted_comment_ids_roll_back() {
        let dir = tempfile::tempdir().unwrap();
        let comments = format!(
            r#"<w:comments xmlns:w="{}"><w:comment w:id="4294967295" w:author="X"><w:p><w:r><w:t>old</w:t></w:r></w:p></w:comment></w:comments>"#,
            fixture::W_NS
        );
        let input = fixture::docx_with(dir.path(), "in.docx", BODY, &[("word/comments.xml", comments.as_bytes())]);
        let mut s = EditSession::open(&input, options()).unwrap();
        let before = s.doc.clone();

        let err = s.add_comment("Second", "again", None, None).unwrap_err();
        assert!(matches!(err, EditError::IdsExhausted("comment")));
        assert!(s.doc.same_structure(&before));
        assert_eq!(s.comments().unwrap().len(), 1);

        // No paraId on the legacy comment: resolving changes nothing and still succeeds.
        s.resolve_comment(4294967295).unwrap();
    }
}
