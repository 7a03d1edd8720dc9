//! Compute Engine v1 REST client implementing [`ComputeApi`].
//!
//! Every request carries a bearer token. Failure bodies are reduced to the
//! provider's `error.message` and classified by status code; transport
//! timeouts and connection failures are reported as transient.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    ComputeApi, ComputeFuture, FirewallOutcome, FirewallRule, InstanceId, InstanceRecord,
    InstanceSpec, OperationHandle, OperationScope, RemoteApiError,
};

mod auth;
mod payload;

pub use auth::{AccessToken, TokenError};

use payload::{FirewallInsert, InstanceInsert, InstanceResource, OperationResource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client bound to one API endpoint and one access token.
#[derive(Clone, Debug)]
pub struct GceClient {
    http: Client,
    base_url: String,
    token: AccessToken,
}

impl GceClient {
    /// Builds a client for `base_url` (for example
    /// `https://compute.googleapis.com/compute/v1`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteApiError::Permanent`] when the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>, token: AccessToken) -> Result<Self, RemoteApiError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RemoteApiError::Permanent {
                code: None,
                message: format!("failed to build HTTP client: {err}"),
            })?;
        let raw: String = base_url.into();
        Ok(Self {
            http,
            base_url: raw.trim_end_matches('/').to_owned(),
            token,
        })
    }

    fn instances_url(&self, project: &str, zone: &str) -> String {
        format!("{}/projects/{project}/zones/{zone}/instances", self.base_url)
    }

    fn instance_url(&self, id: &InstanceId) -> String {
        format!("{}/{}", self.instances_url(&id.project, &id.zone), id.name)
    }

    fn firewalls_url(&self, project: &str) -> String {
        format!("{}/projects/{project}/global/firewalls", self.base_url)
    }

    fn operation_url(&self, handle: &OperationHandle) -> String {
        match &handle.scope {
            OperationScope::Zonal(zone) => format!(
                "{}/projects/{}/zones/{zone}/operations/{}",
                self.base_url, handle.project, handle.name
            ),
            OperationScope::Global => format!(
                "{}/projects/{}/global/operations/{}",
                self.base_url, handle.project, handle.name
            ),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteApiError> {
        let response = request
            .bearer_auth(self.token.secret())
            .send()
            .await
            .map_err(|err| transport_error(&err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteApiError::from_status(
            status.as_u16(),
            payload::error_message(&body),
        ))
    }

    async fn operation(
        &self,
        request: RequestBuilder,
        project: &str,
    ) -> Result<OperationHandle, RemoteApiError> {
        let response = self.send(request).await?;
        let resource: OperationResource = decode(response).await?;
        Ok(resource.into_handle(project))
    }

    async fn fetch_instance(&self, id: &InstanceId) -> Result<Option<InstanceRecord>, RemoteApiError> {
        let request = self.http.get(self.instance_url(id));
        match self.send(request).await {
            Ok(response) => {
                let resource: InstanceResource = decode(response).await?;
                Ok(Some(resource.into()))
            }
            Err(RemoteApiError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<OperationHandle, RemoteApiError> {
        let body = InstanceInsert::from(spec);
        debug!(instance = %spec.id, request_id = %spec.request_id, "inserting instance");
        let request = self
            .http
            .post(self.instances_url(&spec.id.project, &spec.id.zone))
            .query(&[("requestId", spec.request_id.as_str())])
            .json(&body);
        self.operation(request, &spec.id.project).await
    }

    async fn remove_instance(&self, id: &InstanceId) -> Result<OperationHandle, RemoteApiError> {
        debug!(instance = %id, "deleting instance");
        let request = self.http.delete(self.instance_url(id));
        self.operation(request, &id.project).await
    }

    async fn insert_firewall(
        &self,
        project: &str,
        rule: &FirewallRule,
    ) -> Result<FirewallOutcome, RemoteApiError> {
        let body = FirewallInsert::from(rule);
        debug!(rule = %rule.name, "inserting firewall rule");
        let request = self.http.post(self.firewalls_url(project)).json(&body);
        match self.operation(request, project).await {
            Ok(handle) => Ok(FirewallOutcome::Created(handle)),
            Err(RemoteApiError::Conflict { .. }) => Ok(FirewallOutcome::AlreadyExists),
            Err(err) => Err(err),
        }
    }

    async fn refresh_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationHandle, RemoteApiError> {
        let request = self.http.get(self.operation_url(handle));
        self.operation(request, &handle.project).await
    }
}

impl ComputeApi for GceClient {
    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ComputeFuture<'a, Option<InstanceRecord>> {
        Box::pin(self.fetch_instance(id))
    }

    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ComputeFuture<'a, OperationHandle> {
        Box::pin(self.insert_instance(spec))
    }

    fn delete_instance<'a>(&'a self, id: &'a InstanceId) -> ComputeFuture<'a, OperationHandle> {
        Box::pin(self.remove_instance(id))
    }

    fn create_firewall_rule<'a>(
        &'a self,
        project: &'a str,
        rule: &'a FirewallRule,
    ) -> ComputeFuture<'a, FirewallOutcome> {
        Box::pin(self.insert_firewall(project, rule))
    }

    fn poll_operation<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> ComputeFuture<'a, OperationHandle> {
        Box::pin(self.refresh_operation(handle))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteApiError> {
    response
        .json::<T>()
        .await
        .map_err(|err| RemoteApiError::Permanent {
            code: None,
            message: format!("unexpected response body: {err}"),
        })
}

fn transport_error(err: &reqwest::Error) -> RemoteApiError {
    let message = err.to_string();
    if err.is_timeout() || err.is_connect() {
        RemoteApiError::Transient {
            code: None,
            message,
        }
    } else {
        RemoteApiError::Permanent {
            code: err.status().map(|status| status.as_u16()),
            message,
        }
    }
}
