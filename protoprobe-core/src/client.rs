//! # Protoprobe Client
//!
//! [`ProtoProbe`] ties every component to one configured proto target. The local schema is
//! compiled from the configured root `.proto` file on each query, so edits on disk are picked
//! up without rebuilding the client. A schema that fails to compile behaves as an empty one.
//!
//! Reflection based operations ([`ProtoProbe::discover`], [`ProtoProbe::mock_request_by_reflection`])
//! ignore the local schema and only reuse the target's credentials.
//!
//! ## Example
//!
//! ```rust,no_run
//! use protoprobe_core::client::ProtoProbe;
//! use protoprobe_core::config::ProbeConfig;
//! use protoprobe_core::invoker::{CallOutcome, RequestHeader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let probe = ProtoProbe::new(ProbeConfig::new("protos/helloworld.proto"));
//!
//! for service in probe.services() {
//!     println!("{}", service.full_name);
//! }
//!
//! let body = probe.mock_request("helloworld.Greeter", "SayHello")?;
//! let headers = vec![RequestHeader::new("authorization", "Bearer token")];
//!
//! if let CallOutcome::Unary(result) = probe
//!     .invoke("localhost:50051", "helloworld.Greeter", "SayHello", &headers, body)
//!     .await?
//! {
//!     println!("{}", result.result);
//! }
//! # Ok(())
//! # }
//! ```
use crate::catalog::{self, CatalogError, ServiceInfo, ServiceMethods};
use crate::config::{ProbeConfig, TargetEndpoint};
use crate::invoker::{self, CallOutcome, InvokeError, RequestHeader};
use crate::reflection::bridge::{self, Discovery, DiscoveryError};
use crate::schema::SchemaRoot;
use std::collections::BTreeMap;

/// One configured proto target.
#[derive(Debug, Clone, Default)]
pub struct ProtoProbe {
    config: ProbeConfig,
}

impl ProtoProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// The endpoint description for `address` with this target's credentials and retry count.
    pub fn target(&self, address: &str) -> TargetEndpoint {
        self.config.target(address)
    }

    /// Compiles the configured schema, degrading to an empty one on failure.
    pub fn schema(&self) -> SchemaRoot {
        SchemaRoot::load_or_empty(&self.config.proto, &self.config.include_dirs)
    }

    pub fn services(&self) -> Vec<ServiceInfo> {
        catalog::list_services(&self.schema())
    }

    pub fn methods(&self, service: &str) -> Result<ServiceMethods, CatalogError> {
        catalog::list_methods(&self.schema(), service)
    }

    pub fn all_methods(&self) -> BTreeMap<String, ServiceMethods> {
        catalog::list_all_methods(&self.schema())
    }

    pub fn mock_request(
        &self,
        service: &str,
        method: &str,
    ) -> Result<serde_json::Value, CatalogError> {
        catalog::mock_request(&self.schema(), service, method)
    }

    /// Calls `service`/`method` on the server at `address`.
    pub async fn invoke(
        &self,
        address: &str,
        service: &str,
        method: &str,
        headers: &[RequestHeader],
        body: serde_json::Value,
    ) -> Result<CallOutcome, InvokeError> {
        let schema = self.schema();
        invoker::invoke(&self.target(address), &schema, service, method, headers, body).await
    }

    /// Discovers every service of the server at `address` through reflection.
    /// An empty `session_id` starts a session with a random id.
    pub async fn discover(
        &self,
        address: &str,
        session_id: &str,
    ) -> Result<Discovery, DiscoveryError> {
        bridge::discover_all(&self.target(address), session_id).await
    }

    pub async fn mock_request_by_reflection(
        &self,
        address: &str,
        service: &str,
        method: &str,
    ) -> Result<serde_json::Value, DiscoveryError> {
        bridge::mock_request_by_reflection(&self.target(address), service, method).await
    }
}
