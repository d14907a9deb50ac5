pub mod config;
pub mod errors;
pub mod models;
pub mod state;
pub mod utils;
