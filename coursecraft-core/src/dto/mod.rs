//! Data Transfer Objects (DTOs)
//!
//! This module contains DTOs used for API communication between the
//! orchestrator and its clients.
//! DTOs are organized by domain area.

pub mod course;
pub mod generation;
pub mod provider;
