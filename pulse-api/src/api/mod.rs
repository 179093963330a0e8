//! HTTP endpoint groups

pub mod admin;
pub mod analytics;
pub mod chat;
pub mod export;
pub mod feedback;
pub mod health;
pub mod ingest;
