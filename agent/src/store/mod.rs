//! Background-synchronized caches over control plane state

pub mod application;
pub mod command;
pub mod deployment;
pub mod event;

pub use application::ApplicationStore;
pub use command::{CommandReporter, CommandStore, ReportableCommand};
pub use deployment::DeploymentStore;
pub use event::EventStore;
