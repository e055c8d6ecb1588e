//! NAV Oracle Library
//!
//! Price resolution and validation pipeline feeding an on-chain basket NAV:
//! multi-source fetch with priority fallback, independent cross-validation,
//! cached degraded mode, and per-basket staleness/deviation invariants.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod nav;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod types;
pub mod validator;
