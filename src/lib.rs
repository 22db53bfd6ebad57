// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Colloquy - a conversational session manager for LLM chat bots.
//!
//! Each conversation is a session with its own config and transcript. A turn
//! goes to a vendor (OpenAI-style or Anthropic-style API), the answer is
//! appended to the transcript, old history is compacted into a summary, and
//! the reply is split into chunks a messaging transport can deliver.
//!
//! # Architecture
//!
//! - [`types`] - Messages, token usage and the [`Vendor`] trait
//! - [`error`] - Error types and result aliases
//! - [`config`] - Application and per-session configuration
//! - [`providers`] - OpenAI and Anthropic adapters, SSE stream aggregation
//! - [`session`] - Sessions, turns, compaction, storage and the registry
//! - [`chunker`] - Splitting answers into transport-sized chunks
//! - [`delivery`] - Ordered delivery of chunks through a [`delivery::Transport`]
//! - [`inline_cache`] - TTL cache for inline answers
//! - [`telemetry`] - Tracing setup and process-wide metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy::config::load_app_config;
//! use colloquy::session::{IncomingTurn, SessionRegistry, SqliteStorage};
//!
//! let app = load_app_config(None, &std::env::current_dir()?)?;
//! let storage = Arc::new(SqliteStorage::open(&app.database_path())?);
//! let registry = SessionRegistry::new(storage, Arc::new(app));
//!
//! let session = registry.get_or_create("chat-1").await?;
//! let outcome = session.submit_turn(IncomingTurn::text("Hi there")).await?;
//! ```

pub mod chunker;
pub mod config;
pub mod delivery;
pub mod error;
pub mod inline_cache;
pub mod providers;
pub mod session;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use chunker::chunk;
pub use config::{AppConfig, SessionConfig, VendorKind};
pub use delivery::{Deliverer, Transport};
pub use error::{
    ConfigError, Result, StorageError, TransportError, TurnError, TurnWarning, VendorError,
};
pub use providers::{create_vendor, AnthropicVendor, OpenAIVendor};
pub use session::{IncomingTurn, Session, SessionRegistry, Storage, TurnOutcome};
pub use types::{
    ContentPart, Message, MessageContent, Role, SharedVendor, TokenUsage, Transcript, Vendor,
    VendorReply,
};

/// Colloquy version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let msg = Message::user("test");
        assert_eq!(msg.role, Role::User);
        assert_eq!(chunk("hello world", 50, false), vec!["hello world".to_string()]);
        assert!(SessionConfig::default().validate().is_ok());
    }
}
