//! Device description fetch and high-level AVTransport/RenderingControl/
//! ConnectionManager calls for a single DLNA renderer (§4.10).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;

use super::services::DlnaService;
use super::soap::{extract_xml_text, SoapError, SoapRequestBuilder, SoapResult};
use crate::protocol_constants::{SOAP_TIMEOUT_SECS, VOLUME_DEBOUNCE_MS};

/// Description paths tried in order when probing a renderer for its device
/// description XML. The first to answer with HTTP 200 wins.
const DESCRIPTION_PATHS: &[&str] = &[
    "/xml/device_description.xml",
    "/description.xml",
    "/DeviceDescription.xml",
    "/upnp/desc/aios_device/aios_device.xml",
    "/dmr/SamsungMRDesc.xml",
    "/rootDesc.xml",
];

/// Static identity and control endpoints parsed from a renderer's device
/// description.
#[derive(Debug, Clone, Default)]
pub struct DeviceDescription {
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    pub udn: String,
    pub av_transport_url: String,
    pub rendering_control_url: String,
    pub connection_manager_url: String,
}

/// Fetches and parses the device description for the renderer at `ip:port`,
/// trying each of [`DESCRIPTION_PATHS`] in turn.
pub async fn fetch_device_description(
    client: &Client,
    ip: &str,
    port: u16,
) -> SoapResult<DeviceDescription> {
    for path in DESCRIPTION_PATHS {
        let url = format!("http://{ip}:{port}{path}");
        let response = match client
            .get(&url)
            .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::debug!("[Dlna] description path {} failed: {}", url, e);
                continue;
            }
        };
        if !response.status().is_success() {
            continue;
        }
        let Ok(body) = response.text().await else {
            continue;
        };
        let base_url = format!("http://{ip}:{port}");
        log::debug!("[Dlna] device description found at {}", url);
        return Ok(parse_device_description(&body, &base_url));
    }
    Err(SoapError::HttpStatus(
        0,
        format!("no device description found for {ip}:{port}"),
    ))
}

/// Parses device description XML into a [`DeviceDescription`].
///
/// Relative `controlURL` values are joined against `base_url`. When more than
/// one `RenderingControl`-like service is advertised (Sonos also exposes
/// `GroupRenderingControl`), the entry whose service type does not contain
/// `GroupRenderingControl` wins.
#[must_use]
pub fn parse_device_description(xml: &str, base_url: &str) -> DeviceDescription {
    let mut info = DeviceDescription::default();
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut in_service = false;
    let mut service_type = String::new();
    let mut control_url = String::new();
    let mut current_tag = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if local == "service" {
                    in_service = true;
                    service_type.clear();
                    control_url.clear();
                }
                current_tag = local;
            }
            Ok(Event::Text(ref e)) => {
                let Ok(text) = e.unescape() else { continue };
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match current_tag.as_str() {
                    "friendlyName" if !in_service => info.friendly_name = text.to_string(),
                    "manufacturer" if !in_service => info.manufacturer = text.to_string(),
                    "modelName" if !in_service => info.model_name = text.to_string(),
                    "UDN" if !in_service => info.udn = text.to_string(),
                    "serviceType" if in_service => service_type = text.to_string(),
                    "controlURL" if in_service => control_url = text.to_string(),
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if local == "service" {
                    in_service = false;
                    if !control_url.is_empty() {
                        let absolute = if control_url.starts_with('/') {
                            format!("{base_url}{control_url}")
                        } else {
                            control_url.clone()
                        };
                        if service_type.contains("AVTransport") {
                            info.av_transport_url = absolute;
                        } else if service_type.contains("RenderingControl") {
                            let is_standard = !service_type.contains("GroupRenderingControl");
                            if is_standard || info.rendering_control_url.is_empty() {
                                info.rendering_control_url = absolute;
                            }
                        } else if service_type.contains("ConnectionManager") {
                            info.connection_manager_url = absolute;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!("[Dlna] device description parse error: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    info
}

fn ms_to_time_string(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

fn time_string_to_ms(s: &str) -> i64 {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return 0;
    }
    let hours: i64 = parts[0].parse().unwrap_or(0);
    let minutes: i64 = parts[1].parse().unwrap_or(0);
    let secs: f64 = parts[2].parse().unwrap_or(0.0);
    ((hours * 3600 + minutes * 60) as f64 * 1000.0 + secs * 1000.0) as i64
}

#[derive(Default)]
struct VolumeDebounceState {
    last_sent_at: Option<std::time::Instant>,
    pending: Option<i32>,
    send_in_flight: bool,
}

/// High-level SOAP client for a single connected DLNA renderer.
pub struct DlnaClient {
    http: Client,
    pub description: DeviceDescription,
    volume: Mutex<VolumeDebounceState>,
}

impl DlnaClient {
    #[must_use]
    pub fn new(http: Client, description: DeviceDescription) -> Self {
        Self {
            http,
            description,
            volume: Mutex::new(VolumeDebounceState::default()),
        }
    }

    fn soap(&self, url: &str) -> SoapRequestBuilder<'_> {
        SoapRequestBuilder::new(&self.http, url)
    }

    // ── AVTransport ──────────────────────────────────────────────────────

    pub async fn set_av_transport_uri(&self, uri: &str, didl_metadata: &str) -> SoapResult<()> {
        self.soap(&self.description.av_transport_url)
            .service(DlnaService::AvTransport)
            .action("SetAVTransportURI")
            .instance_id()
            .arg("CurrentURI", uri)
            .arg("CurrentURIMetaData", didl_metadata)
            .send()
            .await?;
        Ok(())
    }

    pub async fn play(&self) -> SoapResult<()> {
        self.soap(&self.description.av_transport_url)
            .service(DlnaService::AvTransport)
            .action("Play")
            .instance_id()
            .arg("Speed", "1")
            .send()
            .await?;
        Ok(())
    }

    pub async fn pause(&self) -> SoapResult<()> {
        self.soap(&self.description.av_transport_url)
            .service(DlnaService::AvTransport)
            .action("Pause")
            .instance_id()
            .send()
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> SoapResult<()> {
        self.soap(&self.description.av_transport_url)
            .service(DlnaService::AvTransport)
            .action("Stop")
            .instance_id()
            .send()
            .await?;
        Ok(())
    }

    pub async fn seek(&self, position_ms: i64) -> SoapResult<()> {
        self.soap(&self.description.av_transport_url)
            .service(DlnaService::AvTransport)
            .action("Seek")
            .instance_id()
            .arg("Unit", "REL_TIME")
            .arg("Target", ms_to_time_string(position_ms))
            .send()
            .await?;
        Ok(())
    }

    /// Returns the raw `CurrentTransportState` string (`"PLAYING"`, `"PAUSED_PLAYBACK"`, `"STOPPED"`, ...).
    pub async fn get_transport_info(&self) -> SoapResult<String> {
        let response = self
            .soap(&self.description.av_transport_url)
            .service(DlnaService::AvTransport)
            .action("GetTransportInfo")
            .instance_id()
            .send()
            .await?;
        extract_xml_text(&response, "CurrentTransportState").ok_or(SoapError::Parse)
    }

    /// Returns the current position in milliseconds, parsed from `RelTime`.
    pub async fn get_position_info(&self) -> SoapResult<i64> {
        let response = self
            .soap(&self.description.av_transport_url)
            .service(DlnaService::AvTransport)
            .action("GetPositionInfo")
            .instance_id()
            .send()
            .await?;
        let rel_time = extract_xml_text(&response, "RelTime").ok_or(SoapError::Parse)?;
        Ok(time_string_to_ms(&rel_time))
    }

    // ── RenderingControl ─────────────────────────────────────────────────

    pub async fn get_volume(&self) -> SoapResult<i32> {
        if self.description.rendering_control_url.is_empty() {
            return Err(SoapError::HttpStatus(0, "no RenderingControl URL".into()));
        }
        let response = self
            .soap(&self.description.rendering_control_url)
            .service(DlnaService::RenderingControl)
            .action("GetVolume")
            .instance_id()
            .arg("Channel", "Master")
            .send()
            .await?;
        let raw = extract_xml_text(&response, "CurrentVolume").ok_or(SoapError::Parse)?;
        raw.parse().map_err(|_| SoapError::Parse)
    }

    async fn do_set_volume(&self, volume_pct: i32) -> SoapResult<()> {
        let clamped = volume_pct.clamp(0, 100);
        self.soap(&self.description.rendering_control_url)
            .service(DlnaService::RenderingControl)
            .action("SetVolume")
            .instance_id()
            .arg("Channel", "Master")
            .arg("DesiredVolume", clamped.to_string())
            .no_retry()
            .send()
            .await?;
        Ok(())
    }

    /// Sets the renderer's volume, debounced to at most one actual `SetVolume`
    /// call per [`VOLUME_DEBOUNCE_MS`]. Calls arriving within the quiet window
    /// overwrite the pending value; a single deferred send fires at the end
    /// of the window carrying the latest value.
    pub async fn set_volume(self: &Arc<Self>, volume_pct: i32) -> SoapResult<()> {
        if self.description.rendering_control_url.is_empty() {
            return Err(SoapError::HttpStatus(0, "no RenderingControl URL".into()));
        }

        let wait = {
            let mut state = self.volume.lock();
            let elapsed = state
                .last_sent_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::from_millis(VOLUME_DEBOUNCE_MS));

            if elapsed >= Duration::from_millis(VOLUME_DEBOUNCE_MS) {
                state.last_sent_at = Some(std::time::Instant::now());
                state.pending = None;
                None
            } else {
                state.pending = Some(volume_pct);
                if state.send_in_flight {
                    return Ok(());
                }
                state.send_in_flight = true;
                Some(Duration::from_millis(VOLUME_DEBOUNCE_MS) - elapsed)
            }
        };

        let Some(delay) = wait else {
            return self.do_set_volume(volume_pct).await;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let pending = {
                let mut state = this.volume.lock();
                state.send_in_flight = false;
                state.last_sent_at = Some(std::time::Instant::now());
                state.pending.take()
            };
            if let Some(volume) = pending {
                if let Err(e) = this.do_set_volume(volume).await {
                    log::warn!("[Dlna] debounced volume send failed: {}", e);
                }
            }
        });

        Ok(())
    }

    // ── ConnectionManager ────────────────────────────────────────────────

    /// Queries `GetProtocolInfo`, returning the `Sink` string. `None` when
    /// the renderer does not expose a `ConnectionManager` service.
    pub async fn get_protocol_info(&self) -> SoapResult<Option<String>> {
        if self.description.connection_manager_url.is_empty() {
            return Ok(None);
        }
        let response = self
            .soap(&self.description.connection_manager_url)
            .service(DlnaService::ConnectionManager)
            .action("GetProtocolInfo")
            .send()
            .await?;
        Ok(extract_xml_text(&response, "Sink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <friendlyName>Living Room</friendlyName>
    <manufacturer>Sonos, Inc.</manufacturer>
    <modelName>One</modelName>
    <UDN>uuid:RINCON_1234</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <controlURL>/MediaRenderer/AVTransport/Control</controlURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:GroupRenderingControl:1</serviceType>
        <controlURL>/MediaRenderer/GroupRenderingControl/Control</controlURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <controlURL>/MediaRenderer/RenderingControl/Control</controlURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <controlURL>/MediaRenderer/ConnectionManager/Control</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn parses_identity_and_prefers_standard_rendering_control() {
        let info = parse_device_description(SAMPLE_DESCRIPTION, "http://192.168.1.50:1400");
        assert_eq!(info.friendly_name, "Living Room");
        assert_eq!(info.manufacturer, "Sonos, Inc.");
        assert_eq!(info.udn, "uuid:RINCON_1234");
        assert_eq!(
            info.av_transport_url,
            "http://192.168.1.50:1400/MediaRenderer/AVTransport/Control"
        );
        assert_eq!(
            info.rendering_control_url,
            "http://192.168.1.50:1400/MediaRenderer/RenderingControl/Control"
        );
        assert_eq!(
            info.connection_manager_url,
            "http://192.168.1.50:1400/MediaRenderer/ConnectionManager/Control"
        );
    }

    #[test]
    fn group_rendering_control_alone_is_not_mistaken_for_standard() {
        let xml = r#"<root><device>
            <serviceList>
                <service>
                    <serviceType>urn:schemas-upnp-org:service:GroupRenderingControl:1</serviceType>
                    <controlURL>/Group/Control</controlURL>
                </service>
            </serviceList>
        </device></root>"#;
        let info = parse_device_description(xml, "http://x");
        assert_eq!(info.rendering_control_url, "http://x/Group/Control");
    }

    #[test]
    fn time_string_roundtrips_through_ms() {
        assert_eq!(ms_to_time_string(3_723_000), "01:02:03");
        assert_eq!(time_string_to_ms("01:02:03"), 3_723_000);
    }

    #[test]
    fn time_string_to_ms_malformed_defaults_to_zero() {
        assert_eq!(time_string_to_ms("not-a-time"), 0);
    }
}
