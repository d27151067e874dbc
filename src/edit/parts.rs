//! In-memory store of the XML parts an edit session touches.
//!
//! Parts are parsed on first access and written back to the working directory only on flush,
//! so a failed operation never leaves a partially updated set of parts on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::docx::package::{CONTENT_TYPES, DOCUMENT_RELS};
use crate::docx::tree::XmlTree;
use crate::docx::vocab::{
    Ns, COMMENT_PART_NAMESPACES, MC, MC_IGNORABLE, PKG_RELS, PKG_TYPES, W, W15, W16CEX, W16CID,
};
use crate::docx::xml::{parse_part, write_tree};
use crate::edit::error::EditError;

pub const COMMENTS: &str = "word/comments.xml";
pub const COMMENTS_EXTENDED: &str = "word/commentsExtended.xml";
pub const COMMENTS_IDS: &str = "word/commentsIds.xml";
pub const COMMENTS_EXTENSIBLE: &str = "word/commentsExtensible.xml";
pub const PEOPLE: &str = "word/people.xml";
pub const SETTINGS: &str = "word/settings.xml";
pub const STYLES: &str = "word/styles.xml";

/// One of the five comment-family parts and how the package manifests refer to it.
pub struct CommentPart {
    pub name: &'static str,
    pub root_ns: Ns,
    pub root: &'static str,
    pub rel_type: &'static str,
    pub content_type: &'static str,
}

impl CommentPart {
    /// Relationship target relative to `word/`.
    pub fn target(&self) -> &'static str {
        self.name.trim_start_matches("word/")
    }

    /// Empty part with every comment-related namespace declared on the root.
    pub fn new_tree(&self) -> XmlTree {
        let mut tree = XmlTree::with_root(self.root_ns, self.root, COMMENT_PART_NAMESPACES);
        if let Some(root) = tree.root() {
            tree.set_ns_attr(root, MC, "Ignorable", MC_IGNORABLE);
        }
        tree
    }
}

pub const COMMENT_PARTS: [CommentPart; 5] = [
    CommentPart {
        name: COMMENTS,
        root_ns: W,
        root: "comments",
        rel_type: "http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments",
        content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml",
    },
    CommentPart {
        name: COMMENTS_EXTENDED,
        root_ns: W15,
        root: "commentsEx",
        rel_type: "http://schemas.microsoft.com/office/2011/relationships/commentsExtended",
        content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.commentsExtended+xml",
    },
    CommentPart {
        name: COMMENTS_IDS,
        root_ns: W16CID,
        root: "commentsIds",
        rel_type: "http://schemas.microsoft.com/office/2016/09/relationships/commentsIds",
        content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.commentsIds+xml",
    },
    CommentPart {
        name: COMMENTS_EXTENSIBLE,
        root_ns: W16CEX,
        root: "commentsExtensible",
        rel_type: "http://schemas.microsoft.com/office/2018/08/relationships/commentsExtensible",
        content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.commentsExtensible+xml",
    },
    CommentPart {
        name: PEOPLE,
        root_ns: W15,
        root: "people",
        rel_type: "http://schemas.microsoft.com/office/2011/relationships/people",
        content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.people+xml",
    },
];

pub fn comment_part(name: &str) -> Option<&'static CommentPart> {
    COMMENT_PARTS.iter().find(|p| p.name == name)
}

#[derive(Clone, Debug)]
struct StoredPart {
    tree: XmlTree,
    dirty: bool,
}

#[derive(Clone, Debug)]
pub struct PartStore {
    dir: PathBuf,
    parts: BTreeMap<String, StoredPart>,
}

impl PartStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            parts: BTreeMap::new(),
        }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        name.split('/').fold(self.dir.clone(), |p, seg| p.join(seg))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.parts.contains_key(name) || self.path_of(name).is_file()
    }

    /// Parse `name` from disk into the cache. Returns false when the part does not exist.
    fn load(&mut self, name: &str) -> Result<bool, EditError> {
        if self.parts.contains_key(name) {
            return Ok(true);
        }
        let path = self.path_of(name);
        if !path.is_file() {
            return Ok(false);
        }
        let bytes = fs::read(&path)?;
        let tree = parse_part(name, &bytes)?;
        debug!(part = name, "loaded part");
        self.parts
            .insert(name.to_string(), StoredPart { tree, dirty: false });
        Ok(true)
    }

    pub fn get(&mut self, name: &str) -> Result<Option<&XmlTree>, EditError> {
        if !self.load(name)? {
            return Ok(None);
        }
        Ok(self.parts.get(name).map(|p| &p.tree))
    }

    /// Mutable access; the part is written back on flush.
    pub fn get_mut(&mut self, name: &str) -> Result<Option<&mut XmlTree>, EditError> {
        if !self.load(name)? {
            return Ok(None);
        }
        Ok(self.parts.get_mut(name).map(|p| {
            p.dirty = true;
            &mut p.tree
        }))
    }

    pub fn get_or_create(
        &mut self,
        name: &str,
        create: impl FnOnce() -> XmlTree,
    ) -> Result<&mut XmlTree, EditError> {
        if !self.load(name)? {
            debug!(part = name, "created part");
            self.parts.insert(
                name.to_string(),
                StoredPart {
                    tree: create(),
                    dirty: true,
                },
            );
        }
        let part = self
            .parts
            .get_mut(name)
            .ok_or_else(|| EditError::MissingPart(name.to_string()))?;
        part.dirty = true;
        Ok(&mut part.tree)
    }

    /// Comment-family part, created with its standard root when absent.
    pub fn comment_part_mut(&mut self, name: &str) -> Result<&mut XmlTree, EditError> {
        let part = comment_part(name).ok_or_else(|| EditError::MissingPart(name.to_string()))?;
        self.get_or_create(name, || part.new_tree())
    }

    pub fn dirty_parts_mut(&mut self) -> impl Iterator<Item = (&str, &mut XmlTree)> {
        self.parts
            .iter_mut()
            .filter(|(_, p)| p.dirty)
            .map(|(n, p)| (n.as_str(), &mut p.tree))
    }

    /// Write every modified part back to the working directory.
    pub fn flush(&self) -> Result<usize, EditError> {
        let mut written = 0;
        for (name, part) in self.parts.iter().filter(|(_, p)| p.dirty) {
            let path = self.path_of(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, write_tree(&part.tree))?;
            debug!(part = %name, "flushed part");
            written += 1;
        }
        Ok(written)
    }
}

/// Add a relationship for every comment-family part that the document relationships lack.
/// A part counts as present when either its relationship type or its target already occurs.
pub fn ensure_comment_relationships(store: &mut PartStore) -> Result<(), EditError> {
    let rels = store
        .get_mut(DOCUMENT_RELS)?
        .ok_or_else(|| EditError::MissingPart(DOCUMENT_RELS.to_string()))?;
    let root = rels
        .root()
        .ok_or_else(|| EditError::MissingPart(DOCUMENT_RELS.to_string()))?;

    let existing = rels.find_all(root, PKG_RELS, "Relationship");
    let mut next_id = existing
        .iter()
        .filter_map(|r| rels.attr(*r, "Id")?.strip_prefix("rId")?.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
        + 1;

    for part in &COMMENT_PARTS {
        let present = existing.iter().any(|r| {
            rels.attr(*r, "Type") == Some(part.rel_type)
                || rels
                    .attr(*r, "Target")
                    .is_some_and(|t| t.trim_start_matches('/').trim_start_matches("word/") == part.target())
        });
        if present {
            continue;
        }
        let rel = rels.create_element("Relationship");
        rels.set_attr(rel, "Id", format!("rId{next_id}"));
        rels.set_attr(rel, "Type", part.rel_type);
        rels.set_attr(rel, "Target", part.target());
        rels.append_child(root, rel);
        next_id += 1;
    }
    Ok(())
}

/// Add a content-type override for every comment-family part the manifest lacks.
pub fn ensure_comment_content_types(store: &mut PartStore) -> Result<(), EditError> {
    let types = store
        .get_mut(CONTENT_TYPES)?
        .ok_or_else(|| EditError::MissingPart(CONTENT_TYPES.to_string()))?;
    let root = types
        .root()
        .ok_or_else(|| EditError::MissingPart(CONTENT_TYPES.to_string()))?;

    let existing: Vec<String> = types
        .find_all(root, PKG_TYPES, "Override")
        .into_iter()
        .filter_map(|o| types.attr(o, "PartName").map(str::to_string))
        .collect();

    for part in &COMMENT_PARTS {
        let part_name = format!("/{}", part.name);
        if existing.iter().any(|e| *e == part_name) {
            continue;
        }
        let ov = types.create_element("Override");
        types.set_attr(ov, "PartName", part_name);
        types.set_attr(ov, "ContentType", part.content_type);
        types.append_child(root, ov);
    }
    Ok(())
}

/// List `ns`'s prefix in the root's `mc:Ignorable` so consumers that predate the namespace
/// skip it instead of rejecting the part.
pub fn mark_ignorable(tree: &mut XmlTree, ns: Ns) {
    let Some(root) = tree.root() else { return };
    let prefix = tree.prefix_for(ns);
    let current = tree.ns_attr(root, MC, "Ignorable").unwrap_or_default().to_string();
    if current.split_whitespace().any(|p| p == prefix) {
        return;
    }
    let value = if current.trim().is_empty() {
        prefix
    } else {
        format!("{} {prefix}", current.trim())
    };
    tree.set_ns_attr(root, MC, "Ignorable", value);
}
