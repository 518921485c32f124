//! Admission - sliding-window admission control for HTTP APIs
//!
//! This crate decides, per caller identity and per endpoint class, whether a
//! request may proceed. Request timestamps are kept per key and counted over a
//! trailing window; an integration layer for tower/axum attaches the standard
//! `X-RateLimit-*` metadata and answers rejected requests with a 429.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
