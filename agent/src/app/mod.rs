//! Process lifecycle: option set, shared state and the run loop

pub mod options;
pub mod restart;
pub mod run;
pub mod state;
