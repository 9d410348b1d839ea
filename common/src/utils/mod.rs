pub mod config;
pub mod source_code;
