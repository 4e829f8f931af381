//! Common test utilities for integration tests
//!
//! This module provides:
//! - Scripted health probe and overwriter capabilities
//! - Workflow and store fixtures
#![allow(dead_code)]

pub mod capabilities;
pub mod fixtures;
