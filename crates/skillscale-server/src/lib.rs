//! Topic-scoped skill server.
//!
//! A skill server owns exactly one topic prefix on the SkillScale fabric. It
//! subscribes downstream of the switch, pulls request envelopes off the wire,
//! matches each one to a skill from its local catalogue (by explicit name or
//! by description), runs the skill as an isolated child process under a
//! wall-clock timeout, and publishes a correlated response on the request's
//! `reply_to` topic.
//!
//! Internally: one ingress task owns the subscription and feeds a bounded
//! in-process queue; a pool of worker tasks drains it, each worker owning its
//! own publisher connection (publisher handles are never shared).

pub mod catalogue;
pub mod config;
pub mod executor;
pub mod matcher;
pub mod server;

mod error;

pub use catalogue::{Catalogue, Skill};
pub use config::{MatcherKind, ServerConfig};
pub use error::{Result, ServerError};
pub use executor::{ExecutionResult, SkillExecutor};
pub use matcher::{KeywordMatcher, LlmMatcher, Matcher};
pub use server::{ServerHandle, SkillServer};
