//! RPC transport to the control plane

pub mod client;
pub mod control_plane;
pub mod retry;
pub mod status;

pub use client::{RpcClient, RpcClientOptions};
pub use control_plane::{ControlPlane, ControlPlaneClient};
pub use retry::Retry;
pub use status::{RpcCode, RpcError};
