//! # Server Reflection
//!
//! Interacts with the gRPC Server Reflection Protocol to obtain a server's Protobuf schema at
//! runtime, so services can be discovered, mocked and called without local `.proto` files.
//!
//! * [`client`]: the protocol client, resolving a symbol and its imports.
//! * [`proto_source`]: renders fetched descriptors back to `.proto` source.
//! * [`bridge`]: discovery sessions that persist a server's schema and describe its services.
pub mod bridge;
pub mod client;
pub mod proto_source;
