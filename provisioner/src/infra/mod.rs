//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, SSH,
//! HTTP downloads, job persistence, and install-script lookup.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::api` are forbidden.

pub mod command_runner;
pub mod fetch;
pub mod job_store;
pub mod scripts;
pub mod ssh;
pub mod valkey;
