//! Core taskdesk library: session, request state, and the auth protocols
//! built on top of them.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod logging;
pub mod otp;
pub mod registry;
pub mod retry;
pub mod search;
pub mod session;
