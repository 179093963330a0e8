//! Shared core for the pulse feedback services
//!
//! Everything the API server and the enrichment workers have in common:
//! the error taxonomy, configuration, entity types, and the adapters for
//! the primary store, analytics cache, job queues, and vector store.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod text;
pub mod vector;

pub use crate::error::{Error, Result};
