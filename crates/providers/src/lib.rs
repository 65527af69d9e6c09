//! Model backend implementations for the DOM gateway.
//!
//! All providers implement the `domgate_core::Provider` trait.
//! The router selects the correct provider based on configuration.

pub mod openai_compat;
pub mod router;
pub mod scripted;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
pub use scripted::ScriptedProvider;
