//! replyq — deferred-answer batching service.
//!
//! Incoming messages for a user are not answered one by one: a producer
//! appends them to the store and schedules a deferred job. When the job
//! fires, every message that arrived during the window is folded into a
//! single prompt and answered with one model round-trip.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod logger;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod store;
