//! # Invoker
//!
//! Executes a method against a target endpoint and hands back one [`CallOutcome`],
//! whatever the call shape.
//!
//! * **Unary** calls are awaited, retried up to the configured count, and reported as a
//!   [`UnaryResult`] envelope: payload, flattened response metadata and a status block.
//! * **Streaming** calls (server, client, bidirectional) are not awaited. A [`StreamHandle`]
//!   is returned right away and the caller drives it: sending messages, closing the send
//!   side, reading responses, or dropping it to cancel. Streaming calls are never retried.
//!
//! The method is looked up in the local schema before any network I/O, so a missing
//! method never costs a connection attempt.
use crate::BoxError;
use crate::call_kind::CallKind;
use crate::catalog::{self, CatalogError};
use crate::config::{CredentialMode, TargetEndpoint};
use crate::grpc::client::{GrpcClient, GrpcRequestError, build_request};
use crate::schema::SchemaRoot;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::GrpcService;
use tonic::metadata::{KeyAndValueRef, MetadataMap};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Response, Status};

const OUTBOUND_BUFFER: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Lookup(#[from] CatalogError),
    #[error("Failed to read TLS material '{}': {source}", path.display())]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    Transport(String, #[source] tonic::transport::Error),
    #[error("gRPC client request error: '{0}'")]
    Request(#[from] GrpcRequestError),
    #[error("Invalid input: '{0}'")]
    InvalidInput(String),
    #[error("{0}")]
    Rpc(Status),
}

/// A caller-supplied header. Only enabled headers with a non-blank key are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub key: String,
    pub value: String,
    pub enabled: bool,
}

impl RequestHeader {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
        }
    }

    pub fn disabled(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(key, value)
        }
    }
}

/// Keeps enabled headers with a non-blank key, trimming keys and values.
pub fn request_metadata(headers: &[RequestHeader]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|h| h.enabled && !h.key.trim().is_empty())
        .map(|h| (h.key.trim().to_string(), h.value.trim().to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatus {
    pub code: i32,
    /// Wall-clock milliseconds from dispatch to response receipt.
    pub response_time: u64,
    pub details: String,
}

/// The envelope of a completed unary call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnaryResult {
    pub result: serde_json::Value,
    pub metadata: Vec<MetadataEntry>,
    pub status: CallStatus,
}

impl UnaryResult {
    fn from_response(response: Response<serde_json::Value>, started: Instant) -> Self {
        let response_time = started.elapsed().as_millis() as u64;
        let metadata = flatten_metadata(response.metadata());

        Self {
            result: response.into_inner(),
            metadata,
            status: CallStatus {
                code: tonic::Code::Ok as i32,
                response_time,
                details: "OK".to_string(),
            },
        }
    }
}

/// One entry per value, so multi-valued keys appear several times.
fn flatten_metadata(metadata: &MetadataMap) -> Vec<MetadataEntry> {
    metadata
        .iter()
        .map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => MetadataEntry {
                key: key.as_str().to_string(),
                value: value
                    .to_str()
                    .map(str::to_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(value.as_bytes()).into_owned()),
            },
            KeyAndValueRef::Binary(key, value) => MetadataEntry {
                key: key.as_str().to_string(),
                value: value
                    .to_bytes()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default(),
            },
        })
        .collect()
}

pub type ResponseStream = BoxStream<'static, Result<serde_json::Value, Status>>;

/// A live streaming call. Owned by the caller; dropping it cancels the call.
///
/// Responses are read by polling the handle as a [`Stream`]. For client streaming calls it
/// yields exactly one item, available once the send side is closed.
pub struct StreamHandle {
    kind: CallKind,
    requests: Option<mpsc::Sender<serde_json::Value>>,
    responses: ResponseStream,
}

#[derive(Debug, thiserror::Error)]
#[error("The request side of this {0} call is closed")]
pub struct SendClosed(pub CallKind);

impl StreamHandle {
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Sends one more request message. Fails for server streaming calls and once the
    /// send side has been closed.
    pub async fn send(&self, message: serde_json::Value) -> Result<(), SendClosed> {
        let requests = self.requests.as_ref().ok_or(SendClosed(self.kind))?;
        requests
            .send(message)
            .await
            .map_err(|_| SendClosed(self.kind))
    }

    /// Ends the request stream.
    pub fn close_send(&mut self) {
        self.requests = None;
    }

    pub fn into_responses(self) -> ResponseStream {
        self.responses
    }
}

impl Stream for StreamHandle {
    type Item = Result<serde_json::Value, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.responses.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("kind", &self.kind)
            .field("send_open", &self.requests.is_some())
            .finish_non_exhaustive()
    }
}

/// The result of an invocation, tagged by call shape.
#[derive(Debug)]
pub enum CallOutcome {
    Unary(UnaryResult),
    Streaming(StreamHandle),
}

impl CallOutcome {
    pub fn kind(&self) -> CallKind {
        match self {
            CallOutcome::Unary(_) => CallKind::Unary,
            CallOutcome::Streaming(handle) => handle.kind(),
        }
    }
}

/// Looks `service`/`method` up in `schema`, connects to `target` and performs the call.
#[tracing::instrument(skip_all, fields(address = %target.address, %service, %method))]
pub async fn invoke(
    target: &TargetEndpoint,
    schema: &SchemaRoot,
    service: &str,
    method: &str,
    headers: &[RequestHeader],
    body: serde_json::Value,
) -> Result<CallOutcome, InvokeError> {
    let method = catalog::find_method(schema, service, method)?;
    let channel = connect(target).await?;

    Invoker::from_service(channel, schema.clone(), target.retry)
        .dispatch(method, &request_metadata(headers), body)
        .await
}

/// Builds the endpoint for `target`, configuring TLS from its credential mode.
pub async fn endpoint(target: &TargetEndpoint) -> Result<Endpoint, InvokeError> {
    let uri = target.uri();
    let endpoint =
        Endpoint::new(uri.clone()).map_err(|e| InvokeError::InvalidUrl(uri.clone(), e))?;

    let tls = match &target.credentials {
        CredentialMode::Insecure => return Ok(endpoint),
        CredentialMode::ServerTls => ClientTlsConfig::new().with_enabled_roots(),
        CredentialMode::MutualTls(ssl) => {
            let ca = read_pem(&ssl.ca).await?;
            let key = read_pem(&ssl.key).await?;
            let cert = read_pem(&ssl.cert).await?;

            ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(ca))
                .identity(Identity::from_pem(cert, key))
        }
    };

    endpoint
        .tls_config(tls)
        .map_err(|e| InvokeError::InvalidUrl(uri, e))
}

/// Opens a connection to `target`.
pub async fn connect(target: &TargetEndpoint) -> Result<Channel, InvokeError> {
    endpoint(target)
        .await?
        .connect()
        .await
        .map_err(|e| InvokeError::Transport(target.uri(), e))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, InvokeError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| InvokeError::Credentials {
            path: path.to_path_buf(),
            source,
        })
}

/// Calls methods of one schema over one transport.
#[derive(Debug, Clone)]
pub struct Invoker<S = Channel> {
    grpc: GrpcClient<S>,
    schema: SchemaRoot,
    retry: u32,
}

impl Invoker<Channel> {
    /// Connects to `target` and keeps the connection for subsequent calls.
    pub async fn connect(target: &TargetEndpoint, schema: SchemaRoot) -> Result<Self, InvokeError> {
        let channel = connect(target).await?;
        Ok(Self::from_service(channel, schema, target.retry))
    }
}

impl<S> Invoker<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates an invoker from an existing transport (a `Channel`, or an in-process service).
    pub fn from_service(service: S, schema: SchemaRoot, retry: u32) -> Self {
        Self {
            grpc: GrpcClient::new(service),
            schema,
            retry,
        }
    }

    pub fn schema(&self) -> &SchemaRoot {
        &self.schema
    }

    /// Calls `service`/`method` with `body` and the enabled `headers`.
    pub async fn invoke(
        &mut self,
        service: &str,
        method: &str,
        headers: &[RequestHeader],
        body: serde_json::Value,
    ) -> Result<CallOutcome, InvokeError> {
        let method = catalog::find_method(&self.schema, service, method)?;
        self.dispatch(method, &request_metadata(headers), body).await
    }

    async fn dispatch(
        &mut self,
        method: MethodDescriptor,
        metadata: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<CallOutcome, InvokeError> {
        let kind = CallKind::from(&method);
        tracing::debug!(method = method.full_name(), %kind, "dispatching call");

        match &body {
            serde_json::Value::Array(items) if kind.is_client_streaming() => {
                items.iter().try_for_each(|item| check_body(&method, item))?
            }
            serde_json::Value::Null if kind.is_client_streaming() => {}
            body => check_body(&method, body)?,
        }

        match kind {
            CallKind::Unary => self
                .unary(&method, metadata, body)
                .await
                .map(CallOutcome::Unary),
            CallKind::ServerStream => self
                .server_stream(method, metadata, body)
                .map(CallOutcome::Streaming),
            CallKind::ClientStream | CallKind::BidiStream => self
                .request_stream(kind, method, metadata, body)
                .map(CallOutcome::Streaming),
        }
    }

    async fn unary(
        &mut self,
        method: &MethodDescriptor,
        metadata: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<UnaryResult, InvokeError> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            let request = build_request(body.clone(), metadata)?;

            match self.grpc.unary(method, request).await? {
                Ok(response) => return Ok(UnaryResult::from_response(response, started)),
                Err(status) if attempt < self.retry => {
                    attempt += 1;
                    tracing::debug!(%status, attempt, "unary call failed, retrying");
                }
                Err(status) => return Err(InvokeError::Rpc(status)),
            }
        }
    }

    fn server_stream(
        &self,
        method: MethodDescriptor,
        metadata: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<StreamHandle, InvokeError> {
        let request = build_request(body, metadata)?;
        let mut grpc = self.grpc.clone();

        let call = tokio::spawn(async move { grpc.server_streaming(&method, request).await });

        Ok(StreamHandle {
            kind: CallKind::ServerStream,
            requests: None,
            responses: response_messages(call),
        })
    }

    fn request_stream(
        &self,
        kind: CallKind,
        method: MethodDescriptor,
        metadata: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<StreamHandle, InvokeError> {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let outbound = stream::iter(seed_messages(body)?).chain(ReceiverStream::new(rx));
        let request = build_request(outbound, metadata)?;
        let mut grpc = self.grpc.clone();

        let responses = if kind == CallKind::ClientStream {
            let call =
                tokio::spawn(async move { grpc.client_streaming(&method, request).await });
            stream::once(call)
                .map(|joined| settle(joined).map(Response::into_inner))
                .boxed()
        } else {
            let call = tokio::spawn(async move {
                grpc.bidirectional_streaming(&method, request).await
            });
            response_messages(call)
        };

        Ok(StreamHandle {
            kind,
            requests: Some(tx),
            responses,
        })
    }
}

/// Rejects bodies that do not deserialize into the method's input message.
fn check_body(method: &MethodDescriptor, body: &serde_json::Value) -> Result<(), InvokeError> {
    DynamicMessage::deserialize(method.input(), body)
        .map(drop)
        .map_err(|e| {
            InvokeError::InvalidInput(format!(
                "Request body does not match message '{}': {e}",
                method.input().full_name()
            ))
        })
}

type CallTask<T> = tokio::task::JoinHandle<Result<Result<Response<T>, Status>, GrpcRequestError>>;

/// Messages of a spawned streaming call; a failed call yields a single error item.
fn response_messages(call: CallTask<tonic::Streaming<serde_json::Value>>) -> ResponseStream {
    stream::once(call)
        .flat_map(|joined| match settle(joined) {
            Ok(response) => response.into_inner().boxed(),
            Err(status) => stream::iter([Err(status)]).boxed(),
        })
        .boxed()
}

fn settle<T>(
    joined: Result<Result<Result<Response<T>, Status>, GrpcRequestError>, JoinError>,
) -> Result<Response<T>, Status> {
    match joined {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(Status::unavailable(err.to_string())),
        Err(err) => Err(Status::cancelled(err.to_string())),
    }
}

/// The messages a request stream starts with: each element of an array, a single
/// object, or nothing for `null`.
fn seed_messages(body: serde_json::Value) -> Result<Vec<serde_json::Value>, InvokeError> {
    match body {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(items) => Ok(items),
        object @ serde_json::Value::Object(_) => Ok(vec![object]),
        other => Err(InvokeError::InvalidInput(format!(
            "Streaming requests take a JSON object or an array of objects, got '{other}'"
        ))),
    }
}
