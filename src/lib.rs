// Runtime configuration (TOML + env overlay)
pub mod config;

// Session token extraction and verification
pub mod auth;

// Encrypted integration credential store
pub mod credentials;

// HTTP APIs (integration status, OAuth connect flow)
pub mod api;
