//! Transport: configuration, HTTP middleware and handlers, lifecycle state,
//! and the server that ties them together.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod shutdown;

pub use config::*;
pub use handlers::AppState;
pub use server::RpcServer;
pub use shutdown::*;
