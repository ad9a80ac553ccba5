//! Vendor REST API client (§4.3, §6.2).

mod client;
mod signing;
mod types;

pub use client::{RestClient, RestError};
pub use types::TrackMetadata;
