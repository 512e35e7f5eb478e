//! # Generic gRPC Transport
//!
//! Low-level building blocks for performing gRPC calls with dynamic message types.
//!
//! Requests and responses are plain `serde_json::Value`s. The [`codec::JsonCodec`]
//! transcodes them to and from Protobuf binary on the fly using the method's descriptors,
//! so no generated Rust types are needed for the target service.
pub mod client;
pub mod codec;
