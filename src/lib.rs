// Model Gateway
// A provider-agnostic inference gateway: routing, caching, budget
// enforcement and circuit breaking sit in front of a fleet of model
// providers behind one stable request/response contract.

//! # Model Gateway
//!
//! This is the library root. It wires together the gateway's components
//! (domain types, registry, routing, caches, rate limiter, budget
//! enforcer, circuit breaker, safety filters, provider adapters) behind
//! the [`pipeline::Dispatcher`], which is the single entry point the HTTP
//! API and the admin CLI call into.
//!
//! ## Core components
//!
//! - [`domain`]: the request/response contract, model registry entries,
//!   and the runtime state kept per routing decision, cache entry,
//!   rate-limit key, circuit and budget.
//! - [`registry`]: the model registry, held as an atomically-swappable
//!   snapshot so in-flight requests never observe a torn reload.
//! - [`routing`]: the capability/residency/latency filter pipeline and
//!   pluggable sort strategies that pick a candidate (and its fallbacks).
//! - [`cache`]: the exact-match and semantic caches, plus single-flight
//!   coordination for concurrent misses on the same key.
//! - [`rate_limiter`], [`budget`], [`circuit`]: the three admission and
//!   protection layers that run around every dispatch.
//! - [`adapters`]: one implementation per provider family, normalizing
//!   wire formats and errors into the gateway's own types.
//! - [`safety`]: shared prompt/response filtering.
//! - [`pipeline`]: [`pipeline::GatewayState`] and [`pipeline::Dispatcher`],
//!   which sequence every stage above into a single request flow.
//! - [`api`]: the HTTP surface built on top of the dispatcher.
//! - [`config`]: environment/file-backed settings snapshot.

pub mod adapters;
pub mod api;
pub mod auth;
pub mod budget;
pub mod cache;
pub mod circuit;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod routing;
pub mod safety;
pub mod tokens;

pub use error::{GatewayError, GatewayResult};
pub use pipeline::{Dispatcher, GatewayState};
