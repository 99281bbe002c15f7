//! Unravel REST API access.

pub mod client;

pub use client::{AuthToken, Credentials, UnravelClient};
