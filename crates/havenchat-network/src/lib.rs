//! Havenchat swarm networking layer.
//!
//! The substrate every message travels through: an HTTP primitive
//! with separate trust policies per pool, a storage-RPC client with
//! failure accounting and difficulty negotiation, seeded swarm
//! discovery, and the send/receive pipelines on top.
//!
//! # Architecture
//!
//! - [`http`] — JSON-over-HTTPS primitive behind the [`http::Transport`] seam
//! - [`context`] — process-wide shared state ([`context::NetworkContext`])
//! - [`failure`] — per-snode failure accounting
//! - [`rpc`] — storage-RPC dispatch with the status-code policy
//! - [`swarm`] — random-pool bootstrap and per-key swarm resolution
//! - [`peers`] — direct-peer registry for the P2P delivery path
//! - [`send`] — outbound pipeline (PoW, dual-path delivery)
//! - [`receive`] — inbound pipeline (cursor, dedup, envelope unwrap)
//! - [`retry`] — bounded retry wrapper shared by every RPC
//! - [`testing`] — scripted transport for tests

pub mod context;
pub mod failure;
pub mod http;
pub mod peers;
pub mod receive;
pub mod retry;
pub mod rpc;
pub mod send;
pub mod swarm;
pub mod testing;
