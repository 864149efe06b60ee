//! Portassign - stable backend ports for tenant subdomains
//!
//! This library provides the provisioning core for a multi-tenant host:
//! - Keeps two append-only `<port> <subdomain>` registries (frontend and backend)
//! - Assigns each subdomain exactly one backend port, reusing it on every later run
//! - Skips ports already claimed by the externally maintained frontend registry
//! - Serializes concurrent assignments with an advisory lock on the backend registry
//! - Writes the PM2 descriptor and nginx vhost that route to the resolved ports

pub mod allocator;
pub mod assign;
pub mod config;
pub mod error;
pub mod nginx;
pub mod pm2;
pub mod provision;
pub mod registry;
pub mod slug;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
