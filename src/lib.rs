pub mod config;
pub mod docx;
pub mod edit;
