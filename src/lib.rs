//! # Ratchet
//!
//! Core execution engine for an autonomous agent server: agents consume
//! tasks from a shared queue, reason over a pluggable LLM provider
//! abstraction, invoke tools, and coordinate through an in-process
//! message bus.
//!
//! ## Architecture
//!
//! - **Task Store** (`store`): durable, filterable, priority-ordered task CRUD.
//! - **Message Bus** (`bus`): in-process publish/subscribe with bounded history.
//! - **Provider Gateway** (`provider`): one trait over Anthropic, OpenAI-shaped,
//!   Copilot, and mock wire protocols, streaming and non-streaming.
//! - **Agent Runtime** (`agent`): per-agent state machine and reasoning loop.
//! - **Team Scheduler** (`team`): assignment and lifecycle across a team's agents.
//! - **Provider Registry** (`registry`): alias-keyed, cached provider clients.
//! - **Sub-agent Manager** (`subagent`): spawns and polls child tasks.
//!
//! `secrets`, `tools`, and `api` are external collaborators the core calls
//! into but does not own.

pub mod agent;
pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod provider;
pub mod registry;
pub mod secrets;
pub mod store;
pub mod subagent;
pub mod task;
pub mod team;
pub mod tools;

pub use error::{RatchetError, Result};
