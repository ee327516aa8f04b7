pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http_client;
pub mod models;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{AppError, AppResult};
