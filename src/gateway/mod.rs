pub mod auth;
pub mod media;
pub mod protocol;
pub mod server;

pub use server::{AppState, app, run};
