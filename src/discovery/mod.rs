//! Service discovery: registrations, scan generations, and dedup.

mod engine;
mod strategy;

pub use engine::{DiscoveryEngine, DiscoveryListener};
pub use strategy::{BatchQueryStrategy, DiscoveryStrategy, IncrementalQueryStrategy};
