//! Seams between the engine and the outside world.
//!
//! The record store and the four collaborators are injected as trait
//! objects so each can be swapped for a test double.

pub mod ai;
pub mod crawler;
pub mod notifier;
pub mod searcher;
pub mod store;
