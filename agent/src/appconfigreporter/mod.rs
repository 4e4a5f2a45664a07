//! Application config reporter
//!
//! Keeps the control plane's view of application configurations in line
//! with what the repositories contain.

pub mod reporter;

pub use reporter::{AppConfigReporter, Options};
