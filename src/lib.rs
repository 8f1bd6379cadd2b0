pub mod app;
pub mod chat;
pub mod models;
pub mod error;

pub use error::{Error, Result};
