pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod sse;
pub mod stream;
pub mod telemetry;
pub mod transport;
#[cfg(test)]
pub mod test_util;
