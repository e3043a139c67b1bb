//! Application-level building blocks shared by Keel services

pub mod config;
pub mod error;

pub use config::{AppConfig, AppSettings};
pub use error::{AppError, ErrorResponse, Result};
