//! Tracked editing of a package: comments, revisions and the session that owns the working copy.

pub mod comments;
pub mod error;
pub mod ids;
pub mod parts;
pub mod revisions;
pub mod runs;
pub mod script;
pub mod session;

pub use error::EditError;
pub use session::{edit_docx, EditSession, SessionOptions};
