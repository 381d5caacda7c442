//! Unit tests for the VPS provisioner
//!
//! These tests use fake hosts and in-memory stores and run without network
//! or SSH access.

mod api_routes;
mod mocks;
mod orchestrator_scenarios;
