//! Configuration documents stored in Git

pub mod application;

pub use application::{ApplicationConfig, ApplicationSpec};
