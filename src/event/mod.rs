pub mod channel;
pub mod types;
