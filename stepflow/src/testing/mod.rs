//! Test doubles and fixtures.
//!
//! This module provides:
//! - Sample steps and a three-step training pipeline
//! - A stack that records what it was asked to do
//! - The in-memory metadata store

pub mod fixtures;
mod stack;

pub use crate::store::InMemoryStore;
pub use stack::RecordingStack;
