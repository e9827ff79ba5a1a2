//! API module - REST handlers and server lifecycle

pub mod rest;
pub mod dto;
pub mod server;

pub use rest::create_rest_router;
