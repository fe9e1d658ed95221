pub mod btle;
pub mod connection;
pub mod constants;
pub mod memory;
pub mod registry;
pub mod transport;
pub mod types;
pub mod websocket;
