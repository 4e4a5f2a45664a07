//! Deployment controller with its planners and schedulers

#[allow(clippy::module_inception)]
pub mod controller;
pub mod planner;
pub mod reporter;
pub mod scheduler;
pub mod signal;

pub use controller::{Controller, ControllerDeps, ControllerSnapshot, Options, WorkerInfo};
pub use planner::{LastSuccessful, Planner};
pub use reporter::DeploymentReporter;
pub use scheduler::Scheduler;
pub use signal::{new_stop_signal, StopSignal, StopSignalHandler, StopSignalType};
