//! Participant matching and proposal engine for the eventdesk
//! event-registration manager.
//!
//! A participant-detecting custom field lets a guardian reference a
//! sibling or companion already registered for the same event by typing a
//! free-text name. This crate resolves those names: it ranks candidate
//! matches from the event's participant pool by approximate string
//! comparison, auto-selects on exact match, persists the computed
//! proposals as a durable per-value cache, and serializes recomputation
//! across concurrent requests through per-event lock files.

pub mod container;
pub mod custom_field;
pub mod db;
mod error;
pub mod finder;
pub mod locker;
pub mod matching;
mod migrations;
pub mod value;

pub use error::EngineError;
