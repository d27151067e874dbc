pub mod image;
pub mod order;
pub mod package;
pub mod rules;
pub mod tolerant;
pub mod tree;
pub mod vocab;
pub mod widths;
pub mod xml;
