//! Edit scripts: an ordered list of edit operations in TOML, applied in one session.
//!
//! ```toml
//! version = 1
//!
//! [[ops]]
//! op = "comment"
//! paragraph = "The method was applied"
//! highlight = "method"
//! text = "Which method?"
//! label = "q1"
//!
//! [[ops]]
//! op = "reply"
//! parent = "@q1"
//! text = "The second one."
//! author = "Reviewer B"
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use tracing::info;

use crate::edit::error::EditError;
use crate::edit::session::EditSession;

pub const SCRIPT_VERSION: u32 = 1;

#[derive(Clone, Debug, Deserialize)]
pub struct EditScript {
    pub version: u32,
    #[serde(default)]
    pub ops: Vec<Op>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Op {
    #[serde(flatten)]
    pub kind: OpKind,
    /// Overrides the session author for this operation only.
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub initials: Option<String>,
}

/// A comment id, or `"@label"` naming a comment created earlier in the script.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommentRef {
    Id(u32),
    Name(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    Comment {
        paragraph: String,
        text: String,
        #[serde(default)]
        highlight: Option<String>,
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        label: Option<String>,
    },
    Reply {
        parent: CommentRef,
        text: String,
        #[serde(default)]
        label: Option<String>,
    },
    Resolve {
        id: CommentRef,
    },
    DeleteComment {
        id: CommentRef,
    },
    InsertParagraph {
        after: String,
        text: String,
    },
    InsertText {
        paragraph: String,
        after: String,
        text: String,
        #[serde(default)]
        context: Option<String>,
    },
    Delete {
        paragraph: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        context: Option<String>,
    },
    RejectInsertion {
        paragraph: String,
        text: String,
    },
    RestoreDeletion {
        paragraph: String,
        text: String,
    },
    TrackChanges,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Comment { .. } => "comment",
            OpKind::Reply { .. } => "reply",
            OpKind::Resolve { .. } => "resolve",
            OpKind::DeleteComment { .. } => "delete_comment",
            OpKind::InsertParagraph { .. } => "insert_paragraph",
            OpKind::InsertText { .. } => "insert_text",
            OpKind::Delete { .. } => "delete",
            OpKind::RejectInsertion { .. } => "reject_insertion",
            OpKind::RestoreDeletion { .. } => "restore_deletion",
            OpKind::TrackChanges => "track_changes",
        }
    }
}

impl EditScript {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let script: EditScript = toml::from_str(text).context("parse edit script")?;
        if script.version != SCRIPT_VERSION {
            bail!(
                "unsupported edit script version {} (expected {SCRIPT_VERSION})",
                script.version
            );
        }
        Ok(script)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read edit script: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("edit script: {}", path.display()))
    }

    /// Apply every operation in order. Stops at the first failure, which names the operation.
    pub fn apply(&self, session: &mut EditSession) -> anyhow::Result<usize> {
        let mut labels: HashMap<String, u32> = HashMap::new();
        for (i, op) in self.ops.iter().enumerate() {
            let n = i + 1;
            let saved = session.author();
            let saved = (saved.0.to_string(), saved.1.to_string());
            if let Some(author) = &op.author {
                session.set_author(author, op.initials.as_deref());
            } else if let Some(initials) = &op.initials {
                let author = saved.0.clone();
                session.set_author(&author, Some(initials));
            }

            let res = apply_op(session, &op.kind, &mut labels);
            session.set_author(&saved.0, Some(&saved.1));
            res.with_context(|| format!("op #{n} ({})", op.kind.name()))?;
            info!(op = n, kind = op.kind.name(), "applied edit");
        }
        Ok(self.ops.len())
    }
}

fn resolve_ref(r: &CommentRef, labels: &HashMap<String, u32>) -> anyhow::Result<u32> {
    match r {
        CommentRef::Id(id) => Ok(*id),
        CommentRef::Name(name) => match name.strip_prefix('@') {
            Some(label) => labels
                .get(label)
                .copied()
                .ok_or_else(|| anyhow!("unknown comment label: {label}")),
            None => name
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid comment reference: {name:?}")),
        },
    }
}

fn remember(labels: &mut HashMap<String, u32>, label: &Option<String>, id: u32) {
    if let Some(label) = label {
        labels.insert(label.trim_start_matches('@').to_string(), id);
    }
}

fn apply_op(session: &mut EditSession, kind: &OpKind, labels: &mut HashMap<String, u32>) -> anyhow::Result<()> {
    match kind {
        OpKind::Comment {
            paragraph,
            text,
            highlight,
            context,
            label,
        } => {
            let id = session.add_comment(paragraph, text, highlight.as_deref(), context.as_deref())?;
            remember(labels, label, id);
        }
        OpKind::Reply { parent, text, label } => {
            let parent = resolve_ref(parent, labels)?;
            let id = session.reply_comment(parent, text)?;
            remember(labels, label, id);
        }
        OpKind::Resolve { id } => session.resolve_comment(resolve_ref(id, labels)?)?,
        OpKind::DeleteComment { id } => {
            session.delete_comment(resolve_ref(id, labels)?)?;
        }
        OpKind::InsertParagraph { after, text } => session.insert_paragraph(after, text)?,
        OpKind::InsertText {
            paragraph,
            after,
            text,
            context,
        } => session.insert_text(paragraph, after, text, context.as_deref())?,
        OpKind::Delete {
            paragraph,
            target,
            context,
        } => session.propose_deletion(paragraph, target.as_deref(), context.as_deref())?,
        OpKind::RejectInsertion { paragraph, text } => session.reject_insertion(paragraph, text)?,
        OpKind::RestoreDeletion { paragraph, text } => session.restore_deletion(paragraph, text)?,
        OpKind::TrackChanges => session.enable_track_changes()?,
    }
    Ok(())
}

/// Whether a failure came from a lookup the caller can fix by adding context.
pub fn needs_more_context(err: &anyhow::Error) -> bool {
    err.chain().any(|e| {
        matches!(
            e.downcast_ref::<EditError>(),
            Some(
                EditError::AmbiguousText { .. }
                    | EditError::TargetNotUnique { .. }
                    | EditError::ContextNotUnique { .. }
            )
        )
    })
}
