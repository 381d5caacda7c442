//! Application services: the provisioning use-cases.

pub mod named_app;
pub mod orchestrator;
pub mod probe;
pub mod retention;
pub mod snapshot;
pub mod strategy;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;
