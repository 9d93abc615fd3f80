pub mod config;
pub mod errors;
pub mod firmware;
pub mod logging;
