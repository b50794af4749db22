//! Pod scaler service: configuration and the health and metrics HTTP surface

pub mod api;
pub mod config;
