#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations
)]
#![allow(clippy::too_many_arguments, clippy::type_complexity)]

//! # replay-engine
//!
//! Historical market-data replay engine. Pulls tick-level quotation rows out of a
//! relational store in bounded time windows, paces them back out onto a partitioned
//! event bus at a configurable speed multiplier, and warms a shared key/value store
//! with strategy-preheat data before emission begins.
//!
//! At a high level the engine is a linear pipeline with a side-car preheat phase:
//!
//! ```text
//!  [PreheaterRegistry] --(warm KV store)--+
//!                                         v
//!  [DataLoader] --> [BoundedBuffer] --> [Pacer] --> [BrokerPublisher]
//! ```
//!
//! [`coordinator::ReplayCoordinator`] owns the lifecycle and is the only component that
//! mutates [`types::ReplayState`].

/// Shared domain types: [`types::QuotationRecord`], [`types::ReplayParams`],
/// [`types::TimeWindow`], [`types::ReplayState`], [`types::Phase`].
pub mod types;

/// `yyyyMMdd` and `yyyy-MM-dd HH:mm:ss` formatters, pinned by tests.
pub mod time_fmt;

/// Trading-day calendar: `previous_trading_day`, `is_trading_day`.
pub mod calendar;

/// Process-level configuration, loaded from the environment.
pub mod config;

/// Error taxonomy: [`error::ReplayError`] and its recoverable/unrecoverable split.
pub mod error;

/// Default tracing-based logging initialisers.
pub mod logging;

/// Read-only quotation source interface plus the Postgres-backed implementation.
pub mod source;

/// Key/value store client interface plus the Redis-backed implementation, and the
/// well-known key-prefix builders written by preheaters.
pub mod kv;

/// Broker publisher interface plus the Kafka-backed implementation.
pub mod broker;

/// Time-sliced data loader and its window-boundary rule.
pub mod loader;

/// Bounded, ordered, back-pressured buffer between loader and pacer.
pub mod buffer;

/// Virtual-clock emitter/scheduler.
pub mod pacer;

/// Pluggable strategy-preheat task registry.
pub mod preheat;

/// Lifecycle owner: start, stop, status.
pub mod coordinator;

/// Axum control surface: `POST /replay/start`, `POST /replay/stop`, `GET /replay/status`,
/// `GET /metrics`.
pub mod control;

/// Cooperative cancellation signal shared by the loader and pacer workers.
pub mod cancel;
