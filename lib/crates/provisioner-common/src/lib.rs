pub mod job;
pub mod request;

pub use job::{ErrorKind, Job, JobStats, JobStatus, SubmitReceipt, UnknownStatus};
pub use request::{
    AppProvisionRequest, NamedApp, SourceType, UniversalProvisionRequest, UnknownApp,
    UnknownSourceType,
};
