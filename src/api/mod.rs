//! Network-facing side of the session subsystem.
//!
//! `HttpAuthClient` performs the credential and refresh exchanges; the
//! `ApiGateway` wraps ordinary REST calls with the current authorization
//! header and the 401 refresh-and-retry-once policy.
//!
//! Both sit behind traits (`AuthClient`, `Transport`) so tests can script
//! the wire without a server.

pub mod client;
pub mod gateway;

pub use client::{AuthClient, Credentials, HttpAuthClient, LoginExchange, RefreshExchange};
pub use gateway::{ApiGateway, ApiResponse, HttpTransport, RequestSpec, Transport};
