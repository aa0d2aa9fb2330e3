pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod fingerprint;
pub mod logger;
pub mod model;
pub mod reporter;
pub mod views;
