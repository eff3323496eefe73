//! Shared types and wire plumbing for the telemon agent and server.
//!
//! - [`types`]: the gauge/counter metric model and its JSON wire form.
//! - [`hash`]: HMAC-SHA256 payload signatures.
//! - [`transport`]: the encode (sign, gzip, RSA) and decode pipeline.
//! - [`retry`]: the bounded, injectable retry policy used for network
//!   sends and relational storage calls.

pub mod hash;
pub mod retry;
pub mod transport;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("telemon");
}
