//! WebSocket endpoint
//!
//! Every connection may act as a host, a viewer, or both; its role is only
//! ever established by the messages it sends.

mod handler;

pub use handler::{handle_socket, ws_handler};
