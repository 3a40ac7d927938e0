pub mod error;
pub mod ws;

pub use error::{Result, SocketError};
pub use ws::{WsTransport, WsTransportFactory};
