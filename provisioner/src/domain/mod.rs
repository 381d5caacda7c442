//! Domain layer: pure provisioning rules, types and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::application`,
//! `crate::api`, `tokio`, `std::fs`, `std::process`, or `std::net` sockets.
//! All functions are synchronous and take data in, returning data out.

pub mod admission;
pub mod compose;
pub mod error;
pub mod job;
pub mod resources;
pub mod shell;
pub mod validation;

pub use admission::{AdmissionReport, PortCheck, ResourceProfile, can_admit, check_ports};
pub use compose::{ComposeAnalysis, ComposeDocument, ComposeError};
pub use error::{ProvisionError, StoreError, TransitionError, ValidationErrors};
pub use job::{HostTarget, JobKind, JobSpec, SourceSpec};
pub use resources::ResourceSnapshot;
