//! Scoped editing of one package.
//!
//! Opening unpacks the input into a private temporary directory and parses the main document.
//! Edits mutate in-memory trees only. [`EditSession::commit`] serializes everything and
//! repacks to the output; dropping the session without committing discards the working copy
//! and leaves the output untouched.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::docx::order::OrderCorrector;
use crate::docx::package::{DocxPackage, DOCUMENT};
use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::vocab::{Registry, W, W14};
use crate::docx::xml::{parse_part, write_tree};
use crate::edit::error::EditError;
use crate::edit::ids::{Clock, IdSource};
use crate::edit::parts::PartStore;
use crate::edit::runs::{self, Scope};

pub const DEFAULT_AUTHOR: &str = "docx-mender";

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub author: String,
    /// Derived from the author when absent.
    pub initials: Option<String>,
    /// Run the element-order corrector over the modified parts before repacking.
    pub fix_order_on_commit: bool,
    /// Stamp every revision and comment with this date instead of the clock.
    pub fixed_timestamp: Option<String>,
    /// Seed for reproducible paraId/durableId/rsid values.
    pub id_seed: Option<String>,
    pub registry: Registry,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            author: DEFAULT_AUTHOR.to_string(),
            initials: None,
            fix_order_on_commit: true,
            fixed_timestamp: None,
            id_seed: None,
            registry: Registry::standard(),
        }
    }
}

/// Initials from the first letter of each word of `author`.
pub fn initials_of(author: &str) -> String {
    let s: String = author
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    if s.is_empty() {
        author.chars().take(2).collect()
    } else {
        s
    }
}

pub struct EditSession {
    input: PathBuf,
    work: TempDir,
    pub(crate) doc: XmlTree,
    pub(crate) body: NodeId,
    pub(crate) parts: PartStore,
    pub(crate) ids: IdSource,
    pub(crate) clock: Clock,
    pub(crate) author: String,
    pub(crate) initials: String,
    fix_order_on_commit: bool,
    registry: Registry,
}

impl EditSession {
    pub fn open(input: &Path, opts: SessionOptions) -> Result<Self, EditError> {
        if !input.is_file() {
            return Err(EditError::InputMissing(input.to_path_buf()));
        }
        let pkg = DocxPackage::read(input)?;
        let work = tempfile::Builder::new().prefix("docx-mender-").tempdir()?;
        pkg.unpack_to(work.path())?;

        let bytes = pkg
            .part(DOCUMENT)
            .ok_or_else(|| EditError::MissingPart(DOCUMENT.to_string()))?;
        let doc = parse_part(DOCUMENT, bytes)?;
        let body = doc
            .root()
            .filter(|r| doc.is(*r, W, "document"))
            .and_then(|r| doc.find_child(r, W, "body"))
            .ok_or(EditError::MissingBody)?;

        let mut ids = IdSource::new(opts.id_seed.as_deref());
        for n in doc.descendants(body) {
            for attr in ["paraId", "textId"] {
                if let Some(v) = doc.ns_attr(n, W14, attr) {
                    ids.reserve(v);
                }
            }
        }

        let initials = opts.initials.clone().unwrap_or_else(|| initials_of(&opts.author));
        debug!(input = %input.display(), work = %work.path().display(), "opened edit session");
        Ok(Self {
            input: input.to_path_buf(),
            parts: PartStore::new(work.path()),
            work,
            doc,
            body,
            ids,
            clock: Clock::new(opts.fixed_timestamp),
            author: opts.author,
            initials,
            fix_order_on_commit: opts.fix_order_on_commit,
            registry: opts.registry,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn document(&self) -> &XmlTree {
        &self.doc
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn author(&self) -> (&str, &str) {
        (&self.author, &self.initials)
    }

    /// Attribute subsequent edits to `author`. Initials default to the author's.
    pub fn set_author(&mut self, author: &str, initials: Option<&str>) {
        self.author = author.to_string();
        self.initials = initials.map(str::to_string).unwrap_or_else(|| initials_of(author));
    }

    /// Parsed view of another part of the package, if present.
    pub fn part(&mut self, name: &str) -> Result<Option<&XmlTree>, EditError> {
        self.parts.get(name)
    }

    /// The unique paragraph whose run text contains `text`.
    pub fn find_paragraph(&self, text: &str, scope: Scope) -> Result<NodeId, EditError> {
        runs::find_paragraph(&self.doc, self.body, text, scope)
    }

    /// Run `f` against the session; if it fails, every tree and allocator it touched is
    /// restored, so no operation is ever half applied.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EditError>,
    ) -> Result<T, EditError> {
        let doc = self.doc.clone();
        let parts = self.parts.clone();
        let ids = self.ids.clone();
        match f(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!(error = %e, "rolled back edit");
                self.doc = doc;
                self.parts = parts;
                self.ids = ids;
                Err(e)
            }
        }
    }

    /// Serialize all modified parts and repack the working copy to `output`.
    pub fn commit(mut self, output: &Path) -> Result<(), EditError> {
        if self.fix_order_on_commit {
            let corrector = OrderCorrector::new(&self.registry);
            let mut fixes = corrector.correct(&mut self.doc);
            for (name, tree) in self.parts.dirty_parts_mut() {
                let n = corrector.correct(tree);
                debug!(part = name, fixes = n, "element order");
                fixes += n;
            }
            debug!(fixes, "element order on commit");
        }

        let doc_path = DOCUMENT
            .split('/')
            .fold(self.work.path().to_path_buf(), |p, seg| p.join(seg));
        fs::write(&doc_path, write_tree(&self.doc))?;
        let flushed = self.parts.flush()?;

        DocxPackage::from_dir(self.work.path())?.write(output)?;
        info!(
            input = %self.input.display(),
            output = %output.display(),
            parts = flushed + 1,
            "committed edit session"
        );
        Ok(())
    }
}

/// Open `input`, apply `f`, and commit to `output` only if `f` succeeds.
pub fn edit_docx<T>(
    input: &Path,
    output: &Path,
    opts: SessionOptions,
    f: impl FnOnce(&mut EditSession) -> Result<T, EditError>,
) -> Result<T, EditError> {
    let mut session = EditSession::open(input, opts)?;
    let value = f(&mut session)?;
    session.commit(output)?;
    Ok(value)
}


#[cfg(test)]
mod tests {
    use super::testing::options;
    use super::*;
    use crate::docx::package::fixture;

    #[test]
    fn missing_input_and_missing_body_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.docx");
        assert!(matches!(
            EditSession::open(&missing, options()),
            Err(EditError::InputMissing(_))
        ));

        let path = dir.path().join("nobody.docx");
        let doc = format!(r#"<w:document xmlns:w="{}"/>"#, fixture::W_NS);
        fixture::write_zip(&path, &[("word/document.xml", doc.as_bytes())]);
        assert!(matches!(
            EditSession::open(&path, options()),
            Err(EditError::MissingBody)
        ));
    }

    #[test]
    fn failed_closure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture::docx(dir.path(), "in.docx", "<w:p><w:r><w:t>x</w:t></w:r></w:p>");
        let output = dir.path().join("out.docx");
        let res = edit_docx(&input, &output, options(), |s| {
            s.find_paragraph("absent", Scope::Runs).map(|_| ())
        });
        assert!(matches!(res, Err(EditError::ParagraphNotFound(_))));
        assert!(!output.exists());
    }

    #[test]
    fn work_dir_is_removed_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture::docx(dir.path(), "in.docx", "<w:p><w:r><w:t>x</w:t></w:r></w:p>");
        let output = dir.path().join("out.docx");
        let session = EditSession::open(&input, options()).unwrap();
        let work = session.work.path().to_path_buf();
        assert!(work.join("word").join("document.xml").is_file());
        session.commit(&output).unwrap();
        assert!(!work.exists());

        let names: Vec<String> = DocxPackage::read(&output)
            .unwrap()
            .part_names()
            .map(str::to_string)
            .collect();
        assert_eq!(names[0], "[Content_Types].xml");
        assert_eq!(names[1], "_rels/.rels");
        assert_eq!(names[2], "word/_rels/document.xml.rels");
    }

    #[test]
    fn transaction_restores_document_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture::docx(dir.path(), "in.docx", "<w:p><w:r><w:t>x</w:t></w:r></w:p>");
        let mut session = EditSession::open(&input, options()).unwrap();
        let before = session.doc.clone();
        let res: Result<(), EditError> = session.transaction(|s| {
            let body = s.body;
            let p = s.doc.new_element(W, "p");
            s.doc.append_child(body, p);
            Err(EditError::EmptyParagraph)
        });
        assert!(res.is_err());
        assert!(session.doc.same_structure(&before));
    }

    #[test]
    fn initials_from_author() {
        assert_eq!(initials_of("Ada Lovelace"), "AL");
        assert_eq!(initials_of("reviewer"), "R");
    }
}
