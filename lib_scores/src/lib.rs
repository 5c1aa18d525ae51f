//! # lib_scores
//!
//! The concurrency core shared by the scorestream server binaries.
//!
//! ## Contained Modules:
//!
//! - **`cache`**: A TTL cache with single-flight stampede protection. N
//!   concurrent misses on one key cost exactly one upstream fetch.
//! - **`ratelimit`**: A per-client fixed-window request limiter.
//! - **`payload`**: The typed feed data model (keys, payloads, responses).
//! - **`provider`**: The `DataProvider` seam to the upstream source, plus
//!   the mock implementation used when no real upstream is wired in.
//!
//! Everything transport-specific (HTTP routing, WebSocket framing, process
//! configuration) lives in the `servers` crate; this crate only depends on
//! tokio and the serialization stack so it stays easy to test in isolation.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod cache;
pub mod payload;
pub mod provider;
pub mod ratelimit;

pub use cache::{Lookup, Source, TtlCache};
pub use payload::{FeedKey, FeedPayload, FeedResponse, GameScore, PlayerStatLine, TeamRank};
pub use provider::{DataProvider, FetchError, MockScoresProvider};
pub use ratelimit::FixedWindowLimiter;
