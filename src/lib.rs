pub mod api;
pub mod command;
pub mod config;
pub mod hardware;
pub mod http_client;
pub mod pages;
pub mod probe;
pub mod services;

pub use services::config_store;
