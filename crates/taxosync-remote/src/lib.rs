//! # taxosync-remote
//!
//! HTTP implementation of [`taxosync_core::TaxonomyStore`] against the
//! Contentful management API: paginated listing, version-guarded mutations,
//! rate-limit retry and structured failure capture.

pub mod client;
pub mod config;
pub mod retry;

pub use client::ContentfulClient;
pub use config::RemoteConfig;
pub use retry::RateLimitPolicy;
