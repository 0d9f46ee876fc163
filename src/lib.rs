//! Fare Matrix Service — Library Module
//!
//! Re-exports the modules that make up the fare-and-availability matrix
//! scheduler: upstream client, route normalizer, matrix engine, request
//! scheduler, and the thin HTTP front-end built on top of them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod matrix;
pub mod route;
pub mod scheduler;
pub mod types;
pub mod upstream;
