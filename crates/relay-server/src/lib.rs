pub mod auth;
pub mod endpoint;
pub mod handlers;
pub mod hub;
pub mod server;

pub use hub::{Hub, HubHandle, Inbound, Registration};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
