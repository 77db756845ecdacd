//! Public registry resolution.
//!
//! Probes packages and npm scopes for existence, backs off when rate
//! limited, and memoizes answers for the duration of a run.

mod cache;
pub mod resolver;

pub use cache::{ResolutionMemo, TtlCache, MAX_TTL};
pub use resolver::{
    ProbeTarget, RegistryEndpoints, RegistryResolver, ResolutionContext, RetryPolicy,
};
