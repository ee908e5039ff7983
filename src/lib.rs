pub mod message;
pub mod network;
pub mod service;

pub use message::Message;
pub use network::{ConnectionId, ConnectionState, MessageHandler, Network};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, NetworkConfig, Shutdown,
};
