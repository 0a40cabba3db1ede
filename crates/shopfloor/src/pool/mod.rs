mod config;
mod manager;
pub use config::*;
pub use manager::*;
