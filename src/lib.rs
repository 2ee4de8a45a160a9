pub mod config;
pub mod db;
pub mod period;
pub mod reconcile;
pub mod remote;
pub mod service;
pub mod stats;
pub mod store;

/// Application name for XDG paths
pub const APP_NAME: &str = "listenstats";
