//! nanobot-worker - a small task gateway in front of third-party AI APIs
//!
//! Accepts four kinds of task over HTTP (document solving, web screenshots,
//! image generation and voice synthesis), routes each to the upstream provider
//! configured for it, and returns a normalized success or error response.

pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod models;
pub mod prompts;
pub mod providers;
pub mod routes;

pub use error::{Error, Result};
