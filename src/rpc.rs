//! Generated gRPC types for the worker and coordination-store services.

#![allow(clippy::all)]

tonic::include_proto!("wcindex");

/// Converts an internal error into a gRPC status for the caller.
pub fn internal(err: anyhow::Error) -> tonic::Status {
    tonic::Status::internal(format!("{err:#}"))
}
