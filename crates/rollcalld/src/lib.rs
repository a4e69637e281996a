//! Face enrollment and login recognition over HTTP.
//!
//! [`engine`] owns the ONNX models on a dedicated thread, [`service`] holds
//! the enrollment and recognition rules, and [`http`] maps both onto axum
//! routes.

pub mod config;
pub mod decode;
pub mod engine;
pub mod http;
pub mod service;

#[cfg(test)]
mod testing;
