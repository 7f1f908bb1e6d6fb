//! Rendergate - serves prerendered pages to crawlers
//!
//! This library decides, per request, whether a client is a crawler or
//! link-preview bot that cannot execute JavaScript, and if so:
//! - Builds the rendering-service URL for the page the client asked for
//! - Consults optional cache hooks before fetching
//! - Fetches the rendered snapshot, decoding gzip bodies
//! - Falls back to the normal handler whenever anything goes wrong
//!
//! The [`proxy`] module wires this into a gateway that sits in front of an
//! origin application.

pub mod bots;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod pool;
pub mod prerender;
pub mod proxy;
pub mod render;
pub mod request;
pub mod target;

pub use prerender::{Outcome, Prerender};
