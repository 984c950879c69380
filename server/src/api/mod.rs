//! API server and routes

pub mod auth;
pub mod middleware;
pub mod routes;
mod server;
pub mod socket;

pub use auth::AuthManager;
pub use server::ApiServer;
pub use socket::SocketGateway;
