//! Plan preview
//!
//! Shows what deploying a branch would do, without writing any deployment.

pub mod builder;
pub mod handler;

pub use builder::{ApplicationPlanPreviewResult, Builder, PlanPreviewCommandResult};
pub use handler::{Handler, Options};
