//! On-demand installer of the CLI tools plugins rely on

pub mod registry;

pub use registry::ToolRegistry;
