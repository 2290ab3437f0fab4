//! Test module for simlink-core
//!
//! This module contains tests for:
//! - Schedule execution over a real loopback connection
//! - Collaborator registration and host ordering
//! - Endpoint attach, detach and disconnect handling
//! - Configuration loading and directories

// Test modules use exact float comparisons
#![allow(clippy::float_cmp)]

mod registration_tests;
