//! Consumer Gateway
//!
//! WebSocket endpoint consumers connect to. One socket is one session.

pub mod messages;
pub mod server;

pub use messages::{ClientRequest, Command, GatewayError, parse_request};
pub use server::{GatewayServer, GatewayServerError, GatewayState, serve};
