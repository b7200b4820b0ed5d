pub mod app;
pub mod config;
pub mod error;
pub mod history;
pub mod messages;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod services;
