//! DLNA/UPnP renderer client and playback backend (§4.10).
//!
//! - `services` - UPnP service URNs
//! - `soap` - low-level SOAP envelope building, transport, and retry
//! - `didl` - DIDL-Lite metadata XML for `SetAVTransportURI`
//! - `capabilities` - `GetProtocolInfo` parsing and the per-device quality cache
//! - `client` - device description fetch and the high-level AVTransport/RenderingControl/ConnectionManager calls
//! - `backend` - `PlaybackBackend` implementation wrapping the client with a state poll loop

pub mod backend;
pub mod capabilities;
pub mod client;
pub mod didl;
pub mod services;
pub mod soap;

pub use backend::DlnaBackend;
pub use client::{DeviceDescription, DlnaClient};
