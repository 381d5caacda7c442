//! VPS provisioner library: exposes modules for the binary and integration tests.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
