pub mod agent;
pub mod cache;
pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod router;
pub mod secrets;
pub mod sequencer;
pub mod store;
pub mod types;
