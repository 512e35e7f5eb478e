//! # Protoprobe Core
//!
//! `protoprobe-core` discovers, mocks and invokes gRPC services without compile-time
//! knowledge of their Protobuf schema. The schema comes either from `.proto` sources on
//! disk or from a live server through the gRPC Server Reflection Protocol.
//!
//! ## Key Components
//!
//! * **[`schema::SchemaRoot`]:** Compiles a root `.proto` file plus its imports, resolved
//!   against an ordered list of include directories. Broken schemas degrade to an empty root.
//! * **[`catalog`]:** Walks a loaded schema to list services and, per service, the
//!   methods callers can invoke, each with a synthesized example request body.
//! * **[`call_kind::CallKind`]:** The four call shapes (unary, server stream, client stream,
//!   bidirectional stream), derived purely from the method's two streaming flags.
//! * **[`mock::MockSynthesizer`]:** Builds structurally valid example values for any message
//!   type, with a bounded recursion depth so self-referential schemas always terminate.
//! * **[`reflection::bridge::ReflectionSession`]:** Pulls descriptors from a server's
//!   reflection endpoint, renders them back to `.proto` source and persists them so they can
//!   be loaded like any local schema.
//! * **[`invoker::Invoker`]:** Performs the call against a target endpoint (plaintext, TLS
//!   or mutual TLS) and returns a uniform [`invoker::CallOutcome`].
//! * **[`client::ProtoProbe`]:** The facade tying everything to one configured proto target.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod call_kind;
pub mod catalog;
pub mod client;
pub mod config;
pub mod grpc;
pub mod invoker;
pub mod mock;
pub mod reflection;
pub mod schema;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
