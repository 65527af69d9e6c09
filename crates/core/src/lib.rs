//! # DOM Gateway Core
//!
//! Domain types, traits, and error definitions for the multi-tenant
//! conversational gateway. This crate has **no framework dependencies**: it
//! defines the domain model that the store, retrieval, identity, and
//! orchestration crates implement against.
//!
//! ## Layout
//!
//! - [`ids`] / [`model`]: tenant-scoped entities and their identifiers
//! - [`message`]: prompt messages exchanged with model backends
//! - [`provider`]: the model backend abstraction
//! - [`retrieval`]: the retrieval index abstraction and routing scopes
//! - [`identity`]: the normalized identity every request runs as
//! - [`error`]: the error taxonomy shared by all crates

pub mod error;
pub mod identity;
pub mod ids;
pub mod message;
pub mod model;
pub mod provider;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{AuthError, Error, ProviderError, Result, RetrievalError, StoreError};
pub use identity::AuthenticatedUser;
pub use ids::{DocumentId, FeedbackId, MemoryId, MessageId, SessionId, SettingsId, TenantId, UserId};
pub use message::{Message, Role};
pub use model::{
    ChatMessage, ChatSession, EpisodicMemory, Feedback, FontSize, KnowledgeDocument, Language,
    StructuredMemory, Tenant, Theme, User, UserSettings,
};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use retrieval::{
    IndexDocument, NO_ANSWER_SENTINEL, Passage, RetrievalIndex, RetrievalOutcome, RetrievalScope,
};
