mod control;
mod index_page;
pub mod server;

pub use server::{AppState, WebServer};
