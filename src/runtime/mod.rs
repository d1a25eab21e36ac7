//! Top-level bootstrap and shutdown.

pub mod bootstrap;

pub use bootstrap::{Runtime, build_llm_service};
