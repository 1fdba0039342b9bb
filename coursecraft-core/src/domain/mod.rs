//! Core domain types
//!
//! This module contains the core domain structures used across Coursecraft crates.
//! These types represent the fundamental business entities and are shared between
//! the orchestrator (generation and persistence) and its clients (display).

pub mod course;
pub mod export;
pub mod provider;
pub mod quality;
pub mod task;
