//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store and membership calls into hierarchy operations.
//! - Keep callers decoupled from storage details.

pub mod hierarchy_service;
