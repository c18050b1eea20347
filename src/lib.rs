//! Version-control hosting data (repositories, branches, commits and
//! contributors) served over an AMQP request queue.
//!
//! Requests are JSON objects naming an operation and a repository. The
//! [`VcsService`](service::VcsService) routes each one through the
//! [`OperationRegistry`](registry::OperationRegistry) to a GitHub or GitLab
//! adapter opened for that request only, and the
//! [`RpcDispatcher`](rpcamqp_lite::server::RpcDispatcher) publishes the
//! result back to the caller's `reply_to` queue.

pub mod adapter;
pub mod config;
pub mod registry;
pub mod request;
pub mod service;
pub mod telemetry;
