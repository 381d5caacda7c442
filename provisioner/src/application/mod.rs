//! Application layer: job orchestration over the ports in [`ports`].
//!
//! Services here depend on `crate::domain` and on port traits only; the
//! concrete adapters live in `crate::infra` and are wired in `main.rs`.

pub mod ports;
pub mod services;
