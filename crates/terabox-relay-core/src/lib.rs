#![deny(missing_docs)]
//! Terabox Relay core library.
//!
//! Link validation, remote download, per-user activity logging and the
//! relay pipeline that ties them together. Chat transports plug in through
//! [`relay::RelayTransport`].

/// Per-user append-only activity log.
pub mod activity;
/// Configuration management.
pub mod config;
/// Remote download of linked resources.
pub mod fetcher;
/// Link validation and identifier extraction.
pub mod link;
/// Download-and-relay pipeline.
pub mod relay;
/// Chat user identity.
pub mod user;

pub use relay::{RelayOutcome, RelayPipeline, RelayTransport};
pub use user::UserIdentity;
