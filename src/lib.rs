// src/lib.rs
//
// Crate root — public re-exports.

//! Bounded-concurrency task limiter for async Rust.
//!
//! A [`Limiter`] caps how many submitted tasks run at once. Work is handed
//! over as a factory (a closure producing a future); the limiter invokes it
//! when a concurrency slot is available, queuing over-capacity submissions
//! in strict FIFO order. Each submission's outcome — value or error — is
//! relayed back untouched, and a failing task never disturbs its siblings.
//!
//! ```no_run
//! use std::num::NonZeroUsize;
//! use taskgate::Limiter;
//!
//! # async fn fetch(url: &str) -> String { String::new() }
//! # async fn demo() {
//! let limiter = Limiter::new(NonZeroUsize::new(4).unwrap());
//! let page = limiter.submit(|| fetch("https://example.com")).await;
//! # }
//! ```

pub mod config;
pub mod limiter;
pub mod metrics;

pub use config::{Limit, LimiterConfig};
pub use limiter::{Limiter, RunPermit};
pub use metrics::LimiterStats;
