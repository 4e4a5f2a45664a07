//! piped library
//!
//! Components of the deployment agent: control plane caches, the plugin
//! host, the deployment controller and the background watchers around them.

pub mod app;
pub mod appconfigreporter;
pub mod cache;
pub mod config;
pub mod controller;
pub mod deploysource;
pub mod errors;
pub mod eventwatcher;
pub mod filesys;
pub mod git;
pub mod logs;
pub mod metadata;
pub mod planpreview;
pub mod plugin;
pub mod rpc;
pub mod server;
pub mod stageplan;
pub mod statsreporter;
pub mod storage;
pub mod store;
pub mod toolregistry;
pub mod trigger;
pub mod utils;
