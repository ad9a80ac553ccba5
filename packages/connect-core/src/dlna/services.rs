//! UPnP service URNs used for DLNA renderer control.
//!
//! Unlike a fixed-topology device, a generic DLNA renderer does not expose
//! these at well-known paths; the control URL for each service is discovered
//! per device from its description XML (see [`crate::dlna::client`]).

/// UPnP services a DLNA renderer is expected to expose.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum DlnaService {
    /// Transport control: play, pause, stop, seek, position/state query.
    AvTransport,
    /// Volume and mute control.
    RenderingControl,
    /// Protocol/format capability query.
    ConnectionManager,
}

impl DlnaService {
    /// Returns the UPnP service type URN, used both to match `serviceType`
    /// entries in the device description and as the SOAP body namespace.
    #[must_use]
    pub fn urn(&self) -> &'static str {
        match self {
            Self::AvTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            Self::RenderingControl => "urn:schemas-upnp-org:service:RenderingControl:1",
            Self::ConnectionManager => "urn:schemas-upnp-org:service:ConnectionManager:1",
        }
    }

    /// Returns a human-readable name, used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AvTransport => "AVTransport",
            Self::RenderingControl => "RenderingControl",
            Self::ConnectionManager => "ConnectionManager",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urns_match_upnp_schema() {
        assert!(DlnaService::AvTransport.urn().contains("AVTransport"));
        assert!(DlnaService::RenderingControl
            .urn()
            .contains("RenderingControl"));
        assert!(DlnaService::ConnectionManager
            .urn()
            .contains("ConnectionManager"));
    }
}
