pub mod config;
pub mod error;
pub mod logging;

pub use config::ServerConfig;
pub use error::AppError;
