//! LAN IP address detection, used to build the URLs handed out in mDNS
//! advertisement and audio-proxy URLs.

use std::net::IpAddr;

/// Best-effort local IP address of this machine's LAN interface.
#[must_use]
pub fn get_local_ip() -> Option<IpAddr> {
    local_ip_address::local_ip().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ip_when_available_looks_like_an_address() {
        if let Some(ip) = get_local_ip() {
            assert!(!ip.to_string().is_empty());
        }
    }
}
