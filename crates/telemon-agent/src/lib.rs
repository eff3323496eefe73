//! telemon agent: samples host gauges and delivers them to the server.
//!
//! The [`agent::Agent`] runs one sampling loop and one report loop; reports
//! go onto a bounded queue drained by a [`pool::WorkerPool`], each worker
//! delivering through a [`sender::DeliveryClient`] (HTTP or gRPC transport
//! plus the retry schedule).

pub mod agent;
pub mod config;
pub mod grpc;
pub mod pool;
pub mod sender;

pub use agent::Agent;
pub use config::{AgentConfig, WireFormat};
pub use sender::{DeliveryClient, Job, SendError};
