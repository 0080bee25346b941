//! Admission control for inbound chat events.
//!
//! [`AdmissionPolicy`] screens senders (bot filter, allow-lists) and applies
//! the direct-message vs addressed visibility rule. [`RateLimiter`] keeps two
//! lazily refilled token buckets per conversation key.

pub mod admission;
pub mod rate_limit;

pub use admission::{
    is_direct_message_channel, AdmissionDecision, AdmissionPolicy, AdmissionRequest, AllowList,
};
pub use rate_limit::{RateLimitConfig, RateLimiter, UNLIMITED};
