//! # Service Catalog
//!
//! Enumerates the services of a [`SchemaRoot`] and describes their methods the way callers
//! consume them: name, streaming flags, call shape and a synthesized example request body.
//!
//! An empty or degenerate schema is a valid input and produces an empty catalog. Only an
//! explicit lookup of a service or method that the loaded schema does not contain is an error.
use crate::call_kind::CallKind;
use crate::mock::MockSynthesizer;
use crate::schema::SchemaRoot;
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use rand::Rng;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Service {service} does NOT have a method named {method}.")]
    MethodNotFound { service: String, method: String },
}

/// A service found in a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    /// The service name without its package (e.g. `Greeter`).
    pub short_name: String,
    /// The fully-qualified name (e.g. `helloworld.v1.Greeter`).
    pub full_name: String,
}

impl From<&ServiceDescriptor> for ServiceInfo {
    fn from(service: &ServiceDescriptor) -> Self {
        Self {
            short_name: service.name().to_string(),
            full_name: service.full_name().to_string(),
        }
    }
}

/// Whether one side of a call is a stream. Serialized as `1` (stream) or `-1` (single message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFlag {
    Streaming,
    Single,
}

impl StreamFlag {
    pub fn is_streaming(self) -> bool {
        self == StreamFlag::Streaming
    }

    pub fn as_i8(self) -> i8 {
        match self {
            StreamFlag::Streaming => 1,
            StreamFlag::Single => -1,
        }
    }
}

impl From<bool> for StreamFlag {
    fn from(streaming: bool) -> Self {
        if streaming {
            StreamFlag::Streaming
        } else {
            StreamFlag::Single
        }
    }
}

impl Serialize for StreamFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

/// A method as handed to callers before invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    pub name: String,
    pub request_type: String,
    pub response_type: String,
    pub request_stream: StreamFlag,
    pub response_stream: StreamFlag,
    pub kind: CallKind,
    /// Example request message, as Protobuf JSON.
    pub request_body: serde_json::Value,
}

impl MethodInfo {
    pub fn describe<R: Rng>(method: &MethodDescriptor, mock: &mut MockSynthesizer<R>) -> Self {
        Self {
            name: method.name().to_string(),
            request_type: method.input().full_name().to_string(),
            response_type: method.output().full_name().to_string(),
            request_stream: method.is_client_streaming().into(),
            response_stream: method.is_server_streaming().into(),
            kind: CallKind::from(method),
            request_body: mock.synthesize_json(&method.input()),
        }
    }
}

/// The methods of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMethods {
    /// Short service name.
    pub service: String,
    #[serde(rename = "method")]
    pub methods: Vec<MethodInfo>,
}

/// Lists every service of the schema, in file and declaration order.
pub fn list_services(root: &SchemaRoot) -> Vec<ServiceInfo> {
    let services: Vec<ServiceInfo> = root
        .pool()
        .files()
        .flat_map(|file| file.services().collect::<Vec<_>>())
        .map(|service| ServiceInfo::from(&service))
        .collect();

    tracing::debug!(count = services.len(), "listed services");

    services
}

/// Describes the methods of the service named `service` (fully-qualified).
pub fn list_methods(root: &SchemaRoot, service: &str) -> Result<ServiceMethods, CatalogError> {
    let descriptor = find_service(root, service)?;
    Ok(describe_service(&descriptor, &mut MockSynthesizer::new()))
}

/// Describes the methods of every service, keyed by fully-qualified service name.
pub fn list_all_methods(root: &SchemaRoot) -> BTreeMap<String, ServiceMethods> {
    let mut mock = MockSynthesizer::new();

    root.pool()
        .services()
        .map(|service| {
            (
                service.full_name().to_string(),
                describe_service(&service, &mut mock),
            )
        })
        .collect()
}

/// Synthesizes an example request body for one method.
pub fn mock_request(
    root: &SchemaRoot,
    service: &str,
    method: &str,
) -> Result<serde_json::Value, CatalogError> {
    let method = find_method(root, service, method)?;
    Ok(MockSynthesizer::new().synthesize_json(&method.input()))
}

pub fn find_service(root: &SchemaRoot, service: &str) -> Result<ServiceDescriptor, CatalogError> {
    root.pool()
        .get_service_by_name(service)
        .ok_or_else(|| CatalogError::ServiceNotFound(service.to_string()))
}

pub fn find_method(
    root: &SchemaRoot,
    service: &str,
    method: &str,
) -> Result<MethodDescriptor, CatalogError> {
    find_service(root, service)?
        .methods()
        .find(|m| m.name() == method)
        .ok_or_else(|| CatalogError::MethodNotFound {
            service: service.to_string(),
            method: method.to_string(),
        })
}

pub(crate) fn describe_service<R: Rng>(
    service: &ServiceDescriptor,
    mock: &mut MockSynthesizer<R>,
) -> ServiceMethods {
    ServiceMethods {
        service: service.name().to_string(),
        methods: service
            .methods()
            .map(|method| MethodInfo::describe(&method, mock))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_flags_serialize_as_arity() {
        assert_eq!(serde_json::to_value(StreamFlag::from(true)).unwrap(), 1);
        assert_eq!(serde_json::to_value(StreamFlag::from(false)).unwrap(), -1);
    }

    #[test]
    fn empty_schema_has_an_empty_catalog() {
        let root = SchemaRoot::empty();

        assert!(list_services(&root).is_empty());
        assert!(list_all_methods(&root).is_empty());
    }

    #[test]
    fn lookups_in_an_empty_schema_name_the_missing_symbol() {
        let root = SchemaRoot::empty();

        assert_eq!(
            list_methods(&root, "demo.Greeter").unwrap_err(),
            CatalogError::ServiceNotFound("demo.Greeter".to_string())
        );
        assert_eq!(
            CatalogError::MethodNotFound {
                service: "demo.Greeter".to_string(),
                method: "Wave".to_string(),
            }
            .to_string(),
            "Service demo.Greeter does NOT have a method named Wave."
        );
    }
}
