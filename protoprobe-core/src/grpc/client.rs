//! # Generic gRPC Client
//!
//! Wraps `tonic::client::Grpc` to call any method described by a `prost_reflect`
//! [`MethodDescriptor`], whatever transport it runs on: a `Channel`, or any other
//! `GrpcService` such as an in-process server.
//!
//! Every call returns `Result<Result<T, Status>, GrpcRequestError>`: the outer error means
//! the request could not be sent at all, the inner one is a status returned by the server.
use super::codec::JsonCodec;
use crate::BoxError;
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use std::str::FromStr;
use tonic::{
    Response, Status, Streaming,
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid gRPC path '{0}'")]
    InvalidPath(String),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

type CallResult<T> = Result<Result<Response<T>, Status>, GrpcRequestError>;

/// A gRPC client for dynamically described methods.
#[derive(Debug, Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }

    /// Single request, single response.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        request: tonic::Request<serde_json::Value>,
    ) -> CallResult<serde_json::Value> {
        self.ready().await?;
        let path = http_path(method)?;

        Ok(self
            .client
            .unary(request, path, JsonCodec::for_method(method))
            .await)
    }

    /// Single request, stream of responses.
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        request: tonic::Request<serde_json::Value>,
    ) -> CallResult<Streaming<serde_json::Value>> {
        self.ready().await?;
        let path = http_path(method)?;

        Ok(self
            .client
            .server_streaming(request, path, JsonCodec::for_method(method))
            .await)
    }

    /// Stream of requests, single response. Resolves once the request stream ends.
    pub async fn client_streaming(
        &mut self,
        method: &MethodDescriptor,
        request: tonic::Request<impl Stream<Item = serde_json::Value> + Send + 'static>,
    ) -> CallResult<serde_json::Value> {
        self.ready().await?;
        let path = http_path(method)?;

        Ok(self
            .client
            .client_streaming(request, path, JsonCodec::for_method(method))
            .await)
    }

    /// Stream of requests, stream of responses.
    pub async fn bidirectional_streaming(
        &mut self,
        method: &MethodDescriptor,
        request: tonic::Request<impl Stream<Item = serde_json::Value> + Send + 'static>,
    ) -> CallResult<Streaming<serde_json::Value>> {
        self.ready().await?;
        let path = http_path(method)?;

        Ok(self
            .client
            .streaming(request, path, JsonCodec::for_method(method))
            .await)
    }
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).map_err(|_| GrpcRequestError::InvalidPath(path))
}

/// Wraps `payload` in a request carrying `headers` as ASCII metadata.
pub fn build_request<T>(
    payload: T,
    headers: &[(String, String)],
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in headers {
        let key =
            MetadataKey::from_str(k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(v).map_err(|source| {
            GrpcRequestError::InvalidMetadataValue {
                key: k.clone(),
                source,
            }
        })?;
        request.metadata_mut().append(key, val);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_headers_are_all_kept() {
        let headers = vec![
            ("x-tag".to_string(), "a".to_string()),
            ("x-tag".to_string(), "b".to_string()),
        ];

        let request = build_request((), &headers).unwrap();
        let values: Vec<_> = request
            .metadata()
            .get_all("x-tag")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();

        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn invalid_header_key_is_reported() {
        let headers = vec![("bad key".to_string(), "v".to_string())];

        assert!(matches!(
            build_request((), &headers),
            Err(GrpcRequestError::InvalidMetadataKey { key, .. }) if key == "bad key"
        ));
    }
}
