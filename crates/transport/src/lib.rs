//! driftsync-transport: client-side remote-store implementations
//!
//! Two ways to reach a server: [`TcpStore`] speaks the framed protocol
//! over a socket; [`LocalStore`] calls an in-process facade directly.

pub mod local;
pub mod tcp;

pub use local::LocalStore;
pub use tcp::TcpStore;
