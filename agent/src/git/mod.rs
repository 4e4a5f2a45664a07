//! Git client and repository working copies

pub mod client;
pub mod repo;
pub mod repos;

pub use client::{Client, GitClient};
pub use repo::{CommitInfo, GitEnv, Repo};
pub use repos::RepoSet;
