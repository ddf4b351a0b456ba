//! Bucketgate - Admission Control for the File Platform API
//!
//! This crate implements the in-process rate limiter that fronts the
//! bring-your-own-bucket file API. A sliding-window counter store with
//! bounded memory is paired with a resolver that picks the limit for each
//! request from endpoint overrides, permission tiers and defaults.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
