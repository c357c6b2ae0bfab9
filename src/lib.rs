//! GateWatch: intrusion detection and prevention for HTTP request streams.
//!
//! Each request is described by a [`security::RequestDescriptor`] and handed to
//! the [`security::DecisionEngine`], which answers with a
//! [`security::Verdict`]: accept, reject or ban.

pub mod api;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod health;
pub mod metrics;
pub mod rate_limiter;
pub mod security;
