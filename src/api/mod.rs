//! REST API module

pub mod error;
pub mod handlers;
pub mod models;
pub mod openai;
pub mod routes;

pub use routes::{AppState, create_router};
