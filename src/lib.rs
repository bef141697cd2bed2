//! Client library for the Wealth Ocean multi-broker trading panel.
//!
//! Resource collections (broker clients, groups, copy-trading setups) live
//! on the panel backend. This crate reads and writes them over HTTP, keeps a
//! local fallback snapshot for when the backend is unreachable, and polls
//! for broker logins to complete after a client is added.

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod poller;
pub mod remote;
pub mod session;
pub mod storage;
pub mod sync;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use error::PanelError;
