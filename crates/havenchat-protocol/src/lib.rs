//! Wire-level protocol for the Havenchat client core.
//!
//! - [`json`] — lenient parsing of multi-typed wire fields
//! - [`pow`] — Hashcash-style proof of work for message admission
//! - [`envelope`] — opaque envelope codec seam
//! - [`message`] — outbound message wire conversion
//! - [`group`] — open-group message and attachment domain model

pub mod envelope;
pub mod group;
pub mod json;
pub mod message;
pub mod pow;
