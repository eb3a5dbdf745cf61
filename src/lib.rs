//! A minimal remote-procedure-call runtime: a named-handler server and a
//! blocking client sharing a byte-exact wire protocol.
//!
//! [`protocol`] defines the wire format; [`registry`] holds named handlers;
//! [`server`] runs the accept loop and per-connection workers; [`client`]
//! is the blocking caller side.

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications,
    variant_size_differences
)]

pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::{Client, Handle};
pub use protocol::{Payload, RpcError};
pub use registry::Registry;
pub use server::{Server, ShutdownHandle};
