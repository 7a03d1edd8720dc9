//! Resource client facade over the remote compute API.
//!
//! The facade exposes a small vocabulary (instance records, operation
//! handles, firewall rules) and performs no retries: retry and polling policy
//! belongs to the caller.

use std::future::Future;
use std::pin::Pin;

mod error;
pub mod gce;
mod types;

pub use error::RemoteApiError;
pub use types::{
    FirewallOutcome, FirewallRule, InstanceId, InstanceRecord, InstanceSpec, InstanceStatus,
    OperationError, OperationHandle, OperationScope, OperationStatus,
};

/// Future returned by facade operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteApiError>> + Send + 'a>>;

/// Minimal interface over instance, firewall, and operation endpoints.
pub trait ComputeApi {
    /// Fetches an instance, returning `None` when it does not exist.
    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ComputeFuture<'a, Option<InstanceRecord>>;

    /// Starts creating an instance and returns the operation tracking it.
    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ComputeFuture<'a, OperationHandle>;

    /// Starts deleting an instance and returns the operation tracking it.
    fn delete_instance<'a>(&'a self, id: &'a InstanceId) -> ComputeFuture<'a, OperationHandle>;

    /// Creates a firewall rule; an existing rule with the same name is not an
    /// error.
    fn create_firewall_rule<'a>(
        &'a self,
        project: &'a str,
        rule: &'a FirewallRule,
    ) -> ComputeFuture<'a, FirewallOutcome>;

    /// Re-fetches the status of an operation.
    fn poll_operation<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> ComputeFuture<'a, OperationHandle>;
}
