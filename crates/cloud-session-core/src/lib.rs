//! Core abstractions for replicated per-client sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Token` / `derive_session_id` - Client token format and id derivation
//! - `Cookies` - Typed `Cookie` header tokenizer
//! - `SessionRecord` / `SessionData` - What a host keeps per session
//! - `apply_updates` - Path-based in-place mutation
//! - `SessionHooks` / `Clock` - Pluggable strategies
//! - `SessionConfig` - Shared configuration

pub mod config;
pub mod cookie;
pub mod path;
pub mod record;
pub mod token;
pub mod traits;

pub use config::{ConfigError, FetchAction, SessionConfig};
pub use cookie::Cookies;
pub use path::{UpdateError, UpdateOp, apply_update, apply_updates};
pub use record::{SessionData, SessionId, SessionRecord};
pub use token::{Token, TokenError, derive_session_id, is_valid_owner};
pub use traits::{Clock, DefaultHooks, HookError, ManualClock, SessionHooks, SystemClock};
