//! Coursecraft Core
//!
//! Core types and abstractions for the Coursecraft course generation service.
//!
//! This crate contains:
//! - Domain types: Core business entities (Course, Chapter, GenerationTask, etc.)
//! - DTOs: Data transfer objects exchanged over the HTTP API

pub mod domain;
pub mod dto;
