//! Socket gateway: WebSocket upgrade, handshake, and the inbound intent
//! protocol it speaks (§4.8 C12, §6)

mod gateway;
mod protocol;

pub use gateway::SocketGateway;
