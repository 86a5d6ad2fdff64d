pub mod client;
pub mod error;
pub mod message;
pub mod subscription;
pub mod types;
pub mod websocket;
pub use client::ReadClient;
pub use error::{ReadClientError, Result};
