//! Shared service objects used across clients.

mod record_manager;

pub use record_manager::RecordManager;
