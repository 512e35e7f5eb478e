//! # Call Shapes
//!
//! A gRPC method is one of four call shapes, fully determined by whether its request
//! and its response are declared as streams.
use prost_reflect::MethodDescriptor;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Single request, single response.
    Unary,
    /// Single request, stream of responses.
    ServerStream,
    /// Stream of requests, single response.
    ClientStream,
    /// Stream of requests, stream of responses.
    BidiStream,
}

impl CallKind {
    /// Derives the call shape from the two streaming flags of a method.
    pub fn classify(request_streaming: bool, response_streaming: bool) -> Self {
        match (request_streaming, response_streaming) {
            (false, false) => CallKind::Unary,
            (false, true) => CallKind::ServerStream,
            (true, false) => CallKind::ClientStream,
            (true, true) => CallKind::BidiStream,
        }
    }

    pub fn is_streaming(self) -> bool {
        self != CallKind::Unary
    }

    /// Whether the caller sends a stream of requests.
    pub fn is_client_streaming(self) -> bool {
        matches!(self, CallKind::ClientStream | CallKind::BidiStream)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::ServerStream => "server_stream",
            CallKind::ClientStream => "client_stream",
            CallKind::BidiStream => "bidi_stream",
        }
    }
}

impl From<&MethodDescriptor> for CallKind {
    fn from(method: &MethodDescriptor) -> Self {
        CallKind::classify(method.is_client_streaming(), method.is_server_streaming())
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
