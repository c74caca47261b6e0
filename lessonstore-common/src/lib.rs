//! # lessonstore common library
//!
//! Shared code for the lessonstore tools including:
//! - Store initialisation, schema introspection and additive migrations
//! - Lesson document model (content blocks as a closed variant type)
//! - Row models for lessons, tags and associations
//! - Configuration loading
//! - Timestamp and UUID utilities

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use document::{BlockPayload, ContentBlock, LessonDocument};
pub use error::{Error, Result};
