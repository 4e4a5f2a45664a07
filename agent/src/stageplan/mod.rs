//! Stage plans for quick and pipeline syncs

pub mod builder;

pub use builder::{build_pipeline_sync_stages, build_quick_sync_stages, stage_configs};
