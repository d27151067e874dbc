//! Tracked changes: insertion and deletion marks, plus the settings they depend on.
//!
//! Nothing here removes content. Rejecting an insertion wraps its runs in a deletion and
//! restoring a deletion adds an insertion after it, so both records stay in the document.

use tracing::debug;

use crate::docx::order::insert_in_order;
use crate::docx::tree::NodeId;
use crate::docx::vocab::{ElementKind, W, W14, W16DU};
use crate::edit::error::EditError;
use crate::edit::parts::{mark_ignorable, SETTINGS, STYLES};
use crate::edit::runs::{self, set_preserve, Scope};
use crate::edit::session::EditSession;

/// Elements whose `w:id` shares the revision id space.
const REVISION_ELEMENTS: &[&str] = &[
    "ins",
    "del",
    "moveFrom",
    "moveTo",
    "rPrChange",
    "pPrChange",
    "sectPrChange",
    "tblPrChange",
    "trPrChange",
    "tcPrChange",
    "tblGridChange",
    "numberingChange",
    "cellIns",
    "cellDel",
    "cellMerge",
];

/// Indent used for inserted paragraphs whose anchor has no paragraph properties.
const DEFAULT_FIRST_LINE_INDENT: &str = "420";

impl EditSession {
    /// One more than the largest revision id in the document.
    fn next_revision_id(&self) -> Result<u32, EditError> {
        let Some(root) = self.doc.root() else {
            return Ok(1);
        };
        self.doc
            .descendants(root)
            .into_iter()
            .filter(|n| {
                self.doc
                    .local_name(*n)
                    .is_some_and(|l| REVISION_ELEMENTS.contains(&l) && self.doc.is(*n, W, l))
            })
            .filter_map(|n| self.doc.ns_attr(n, W, "id")?.trim().parse::<u32>().ok())
            .max()
            .map_or(Ok(1), |m| m.checked_add(1).ok_or(EditError::IdsExhausted("revision")))
    }

    /// A detached `w:ins`/`w:del` stamped with the current author and date.
    fn revision_mark(&mut self, local: &str, id: u32) -> NodeId {
        let date = self.clock.now();
        let mark = self.doc.new_element(W, local);
        self.doc.set_ns_attr(mark, W, "id", id.to_string());
        self.doc.set_ns_attr(mark, W, "author", self.author.clone());
        self.doc.set_ns_attr(mark, W, "date", date.as_str());
        self.doc.set_ns_attr(mark, W16DU, "dateUtc", date);
        mark_ignorable(&mut self.doc, W16DU);
        mark
    }

    fn text_run(&mut self, rpr: Option<NodeId>, rsid: &str, text: &str) -> NodeId {
        let r = self.doc.new_element(W, "r");
        self.doc.set_ns_attr(r, W, "rsidR", rsid);
        if let Some(rpr) = rpr {
            self.doc.append_child(r, rpr);
        }
        let t = self.doc.new_element(W, "t");
        self.doc.set_text(t, text);
        set_preserve(&mut self.doc, t);
        self.doc.append_child(r, t);
        r
    }

    fn inherited_rpr(&mut self, p: NodeId, at: Option<NodeId>) -> Result<NodeId, EditError> {
        let styles = self.parts.get(STYLES)?;
        Ok(runs::inherited_rpr(&mut self.doc, p, at, styles))
    }

    /// Insert a new paragraph holding `text` as a tracked insertion right after the paragraph
    /// containing `after`.
    pub fn insert_paragraph(&mut self, after: &str, text: &str) -> Result<(), EditError> {
        self.transaction(|s| {
            let anchor = s.find_paragraph(after, Scope::Runs)?;
            let rpr = s.inherited_rpr(anchor, None)?;
            let para_id = s.ids.para_id();
            let text_id = s.ids.para_id();
            let rsid = s.ids.rsid();
            s.register_rsid(&rsid)?;
            let mark_id = s.next_revision_id()?;

            let p = s.doc.new_element(W, "p");
            s.doc.set_ns_attr(p, W14, "paraId", para_id);
            s.doc.set_ns_attr(p, W14, "textId", text_id);
            s.doc.set_ns_attr(p, W, "rsidR", rsid.as_str());
            s.doc.set_ns_attr(p, W, "rsidRDefault", rsid.as_str());
            mark_ignorable(&mut s.doc, W14);

            let ppr = match s.doc.find_child(anchor, W, "pPr") {
                Some(src) => {
                    let copy = s.doc.deep_clone(src);
                    for local in ["sectPr", "pPrChange"] {
                        for c in s.doc.find_children(copy, W, local) {
                            s.doc.detach(c);
                        }
                    }
                    copy
                }
                None => {
                    let ppr = s.doc.new_element(W, "pPr");
                    let ind = s.doc.new_element(W, "ind");
                    s.doc.set_ns_attr(ind, W, "firstLine", DEFAULT_FIRST_LINE_INDENT);
                    s.doc.append_child(ppr, ind);
                    ppr
                }
            };
            // The paragraph mark is part of the insertion too.
            let mark_rpr = match s.doc.find_child(ppr, W, "rPr") {
                Some(r) => r,
                None => {
                    let r = s.doc.new_element(W, "rPr");
                    insert_in_order(&mut s.doc, ppr, r, ElementKind::ParagraphProperties);
                    r
                }
            };
            for stale in ["ins", "del"] {
                for c in s.doc.find_children(mark_rpr, W, stale) {
                    s.doc.detach(c);
                }
            }
            let mark_ins = s.revision_mark("ins", mark_id);
            s.doc.insert_child(mark_rpr, 0, mark_ins);
            s.doc.append_child(p, ppr);

            let run_id = mark_id
                .checked_add(1)
                .ok_or(EditError::IdsExhausted("revision"))?;
            let ins = s.revision_mark("ins", run_id);
            let run = s.text_run(Some(rpr), &rsid, text);
            s.doc.append_child(ins, run);
            s.doc.append_child(p, ins);

            s.doc.insert_after(anchor, p);
            debug!(after, "inserted paragraph");
            Ok(())
        })
    }

    /// Insert `text` as a tracked insertion right after `after` inside the paragraph
    /// containing `paragraph`.
    pub fn insert_text(
        &mut self,
        paragraph: &str,
        after: &str,
        text: &str,
        context: Option<&str>,
    ) -> Result<(), EditError> {
        self.transaction(|s| {
            let p = s.find_paragraph(paragraph, Scope::Runs)?;
            let anchor = runs::find_and_split_text(&mut s.doc, p, after, context)?;
            let rpr = s.inherited_rpr(p, Some(anchor))?;
            let rsid = s.ids.rsid();
            s.register_rsid(&rsid)?;

            let id = s.next_revision_id()?;
            let ins = s.revision_mark("ins", id);
            let run = s.text_run(Some(rpr), &rsid, text);
            s.doc.append_child(ins, run);
            s.doc.insert_after(anchor, ins);
            Ok(())
        })
    }

    /// Wrap `run` in a deletion mark, turning its text leaves into deleted text.
    fn delete_run(&mut self, run: NodeId, id: u32) {
        for c in self.doc.child_elements(run) {
            if self.doc.is(c, W, "t") {
                self.doc.rename(c, W, "delText");
                let text = self.doc.text(c);
                if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
                    set_preserve(&mut self.doc, c);
                }
            } else if self.doc.is(c, W, "instrText") {
                self.doc.rename(c, W, "delInstrText");
            }
        }
        let del = self.revision_mark("del", id);
        self.doc.insert_before(run, del);
        self.doc.append_child(del, run);
    }

    /// Propose deleting `target` (disambiguated by `context`) from the paragraph containing
    /// `paragraph`, or every text run of it when no target is given. Each run gets its own
    /// deletion mark.
    pub fn propose_deletion(
        &mut self,
        paragraph: &str,
        target: Option<&str>,
        context: Option<&str>,
    ) -> Result<(), EditError> {
        self.transaction(|s| {
            let p = s.find_paragraph(paragraph, Scope::Runs)?;
            let id = s.next_revision_id()?;
            match target {
                Some(target) => {
                    let run = runs::find_and_split_text(&mut s.doc, p, target, context)?;
                    s.delete_run(run, id);
                }
                None => {
                    let text_runs: Vec<NodeId> = runs::direct_runs(&s.doc, p)
                        .into_iter()
                        .filter(|r| s.doc.find_child(*r, W, "t").is_some())
                        .collect();
                    if text_runs.is_empty() {
                        return Err(EditError::EmptyParagraph);
                    }
                    for (k, run) in text_runs.into_iter().enumerate() {
                        let run_id = u32::try_from(k)
                            .ok()
                            .and_then(|k| id.checked_add(k))
                            .ok_or(EditError::IdsExhausted("revision"))?;
                        s.delete_run(run, run_id);
                    }
                }
            }
            Ok(())
        })
    }

    /// Reject the insertion containing `text` in the paragraph containing `paragraph`: its
    /// runs are wrapped in a deletion mark inside the insertion.
    pub fn reject_insertion(&mut self, paragraph: &str, text: &str) -> Result<(), EditError> {
        self.transaction(|s| {
            let p = s.find_paragraph(paragraph, Scope::WithRevisions)?;
            let ins = s
                .doc
                .find_all(p, W, "ins")
                .into_iter()
                .find(|ins| {
                    let content: String = s
                        .doc
                        .find_all(*ins, W, "t")
                        .into_iter()
                        .map(|t| s.doc.text(t))
                        .collect();
                    content.contains(text)
                })
                .ok_or_else(|| EditError::RevisionNotFound(text.to_string()))?;

            let inserted = s.doc.find_children(ins, W, "r");
            let Some(&first) = inserted.first() else {
                return Err(EditError::RevisionNotFound(text.to_string()));
            };
            let id = s.next_revision_id()?;
            let del = s.revision_mark("del", id);
            s.doc.insert_before(first, del);
            for run in inserted {
                for t in s.doc.find_children(run, W, "t") {
                    s.doc.rename(t, W, "delText");
                    set_preserve(&mut s.doc, t);
                }
                s.doc.append_child(del, run);
            }
            Ok(())
        })
    }

    /// Restore the deletion containing `text` in the paragraph containing `paragraph` by
    /// inserting the same text, with the deletion's formatting, right after it.
    pub fn restore_deletion(&mut self, paragraph: &str, text: &str) -> Result<(), EditError> {
        self.transaction(|s| {
            let p = s.find_paragraph(paragraph, Scope::WithRevisions)?;
            let del = s
                .doc
                .find_children(p, W, "del")
                .into_iter()
                .find(|d| {
                    let content: String = s
                        .doc
                        .find_all(*d, W, "delText")
                        .into_iter()
                        .map(|t| s.doc.text(t))
                        .collect();
                    content.contains(text)
                })
                .ok_or_else(|| EditError::RevisionNotFound(text.to_string()))?;

            let rpr = s
                .doc
                .find_first(del, W, "rPr")
                .map(|r| s.doc.deep_clone(r));
            let rsid = s.ids.rsid();
            s.register_rsid(&rsid)?;
            let id = s.next_revision_id()?;
            let ins = s.revision_mark("ins", id);
            let run = s.text_run(rpr, &rsid, text);
            s.doc.append_child(ins, run);
            s.doc.insert_after(del, ins);
            Ok(())
        })
    }

    /// Turn on change tracking in `settings.xml`. Packages without settings are left alone.
    pub fn enable_track_changes(&mut self) -> Result<(), EditError> {
        let present = match self.parts.get(SETTINGS)? {
            Some(tree) => tree
                .root()
                .map_or(true, |root| tree.find_child(root, W, "trackRevisions").is_some()),
            None => return Ok(()),
        };
        if present {
            return Ok(());
        }
        if let Some(tree) = self.parts.get_mut(SETTINGS)? {
            if let Some(root) = tree.root() {
                let flag = tree.new_element(W, "trackRevisions");
                insert_in_order(tree, root, flag, ElementKind::Settings);
            }
        }
        Ok(())
    }

    /// Record `rsid` in the settings' `w:rsids` list. Repeats and missing settings are no-ops.
    pub(crate) fn register_rsid(&mut self, rsid: &str) -> Result<(), EditError> {
        let Some(tree) = self.parts.get(SETTINGS)? else {
            return Ok(());
        };
        let Some(root) = tree.root() else {
            return Ok(());
        };
        let known = tree.find_child(root, W, "rsids").is_some_and(|list| {
            tree.find_children(list, W, "rsid")
                .into_iter()
                .any(|r| tree.ns_attr(r, W, "val") == Some(rsid))
        });
        if known {
            return Ok(());
        }

        let Some(tree) = self.parts.get_mut(SETTINGS)? else {
            return Ok(());
        };
        let list = match tree.find_child(root, W, "rsids") {
            Some(list) => list,
            None => {
                let list = tree.new_element(W, "rsids");
                insert_in_order(tree, root, list, ElementKind::Settings);
                list
            }
        };
        let entry = tree.new_element(W, "rsid");
        tree.set_ns_attr(entry, W, "val", rsid);
        tree.append_child(list, entry);
        Ok(())
    }
}
