//! On-disk layout and piped configuration

pub mod layout;
pub mod settings;
pub mod source;
