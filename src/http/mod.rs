//! reqwest adapters for the interceptors.

pub mod client;
pub mod evented;
pub mod request;
pub mod response;

pub use client::InstrumentedClient;
pub use evented::EventedRequest;
pub use request::normalize_url;
