// Configuration and environment secrets
pub mod config;

// Caller identity
pub mod auth;

// Token encryption and connection storage
pub mod credentials;

// Provider adapters and registry
pub mod platform;

// Post-link sync trigger
pub mod sync;

// HTTP APIs
pub mod api;
