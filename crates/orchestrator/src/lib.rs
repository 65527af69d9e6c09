//! # DOM Gateway Orchestration
//!
//! Everything that happens between an authenticated request and the store:
//!
//! - [`composer`]: raw model text into Decision / Why / Next 3 Actions
//! - [`pipeline`]: the per-turn fragment stream and transcript summaries
//! - [`lifecycle`]: session reset into episodic memory
//! - [`chat`], [`memory`], [`ingest`]: the services the HTTP layer calls
//! - [`feedback`], [`settings`]: reply ratings and per-user preferences

pub mod chat;
pub mod composer;
pub mod feedback;
pub mod fragment;
pub mod ingest;
pub mod lifecycle;
pub mod memory;
pub mod pipeline;
pub mod settings;

pub use chat::ChatService;
pub use composer::{ComposedAnswer, TokenCollector, compose};
pub use feedback::{FeedbackService, NewFeedback};
pub use fragment::TurnFragment;
pub use ingest::{KnowledgeIngestor, Upload, UploadPolicy};
pub use lifecycle::reset_session;
pub use memory::{MemoryScope, MemoryService};
pub use pipeline::{EMPTY_HISTORY_SUMMARY, FragmentStream, Orchestrator, TurnSettings};
pub use settings::{SettingsService, SettingsUpdate};
