pub mod chat;
pub mod config;
pub mod envelope;
pub mod events;
pub mod message;
pub mod stream;
pub mod video;
