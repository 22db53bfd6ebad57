// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sessions and the turn pipeline.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SessionRegistry                         │
//! │        (get_or_create, reset, update_config, evict)          │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Session::submit_turn                                        │
//! │  slot → dispatch (retry) → append → compact → persist → chunk│
//! └──────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//!   ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//!   │   Vendor    │     │  Compaction  │     │   Storage    │
//!   │ (adapters)  │     │  (summaries) │     │ (SQLite/mem) │
//!   └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy::session::{IncomingTurn, SessionRegistry, SqliteStorage};
//!
//! let storage = Arc::new(SqliteStorage::open(&app.database_path())?);
//! let registry = SessionRegistry::new(storage, Arc::new(app));
//!
//! let session = registry.get_or_create("chat-42").await?;
//! let outcome = session.submit_turn(IncomingTurn::text("Hello!")).await?;
//! for chunk in &outcome.chunks {
//!     println!("{}", chunk);
//! }
//! ```

pub mod compaction;
pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod storage;
pub mod types;

pub use compaction::{
    apply_summary, build_summary_request, find_compaction_boundary, Summary, DECAY, MAX_ROUNDS,
};
pub use dispatch::Exhausted;
pub use engine::{default_factory, Session, VendorFactory, IMAGE_HISTORY};
pub use registry::SessionRegistry;
pub use storage::{MemoryStorage, SqliteStorage, Storage, SCHEMA_VERSION, TEMPLATE_LIMIT};
pub use types::{
    with_usage_footer, ImageAttachment, IncomingTurn, QuotedReply, SessionId, TurnOutcome,
};
