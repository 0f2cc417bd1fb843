//! Open-group REST client.
//!
//! Server-hosted chat rooms over an ADN-style REST API, sharing the
//! swarm substrate's HTTP primitive and retry discipline.
//!
//! - [`auth`] — challenge-based token exchange with in-flight dedup
//! - [`client`] — messages, deletions, moderation, channels, users,
//!   uploads

pub mod auth;
pub mod client;
