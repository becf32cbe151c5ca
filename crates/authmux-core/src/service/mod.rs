//! Core services

mod server_log_manager;

pub use server_log_manager::ServerLogManager;
