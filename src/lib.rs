//! A relay that lets a browser load third-party pages through a single
//! endpoint, rewriting HTML and CSS so every reference stays on the relay.

pub mod config;
pub mod error;
pub mod filters;
pub mod message;
pub mod relay;
pub mod server;
