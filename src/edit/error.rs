use std::path::PathBuf;

use thiserror::Error;

use crate::docx::tolerant::ParseError;

/// Failures of an edit operation. Lookup failures are split by cause so callers can tell
/// "add more context" apart from "nothing there".
#[derive(Debug, Error)]
pub enum EditError {
    #[error("input package not found: {0}")]
    InputMissing(PathBuf),

    #[error("package is missing required part: {0}")]
    MissingPart(String),

    #[error("main document has no w:body")]
    MissingBody,

    #[error("no paragraph contains {0:?}")]
    ParagraphNotFound(String),

    #[error("{text:?} matches {count} paragraphs; use more specific text")]
    AmbiguousText { text: String, count: usize },

    #[error("{0:?} not found in paragraph")]
    TargetNotFound(String),

    #[error("{target:?} occurs {count} times; provide a context string")]
    TargetNotUnique { target: String, count: usize },

    #[error("context {context:?} occurs {count} times in paragraph")]
    ContextNotUnique { context: String, count: usize },

    #[error("{target:?} does not occur in context {context:?}")]
    TargetNotInContext { target: String, context: String },

    #[error("paragraph has no text runs")]
    EmptyParagraph,

    #[error("comment {0} not found")]
    CommentNotFound(u32),

    #[error("parent comment {0} not found")]
    ParentNotFound(u32),

    #[error("no revision mark contains {0:?}")]
    RevisionNotFound(String),

    #[error("no {0} ids left above the largest one in the document")]
    IdsExhausted(&'static str),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Package(#[from] anyhow::Error),
}
