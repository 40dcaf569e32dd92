//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store and resolver calls into lifecycle operations.
//! - Keep boundary adapters decoupled from storage details.

pub mod clock;
pub mod lifecycle_service;
