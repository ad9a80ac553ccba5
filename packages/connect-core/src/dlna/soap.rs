//! Low-level SOAP envelope building, transport, and retry for DLNA/UPnP calls.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use super::services::DlnaService;
use crate::protocol_constants::{SOAP_MAX_RETRIES, SOAP_RETRY_DELAY_MS, SOAP_TIMEOUT_SECS};

/// Errors that can occur sending a SOAP action to a DLNA renderer.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the renderer failed (connection, timeout, transport).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Renderer returned a non-success HTTP status without a parseable fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Renderer returned a SOAP fault (`<errorCode>`/`<errorDescription>`).
    #[error("SOAP fault: {0}")]
    Fault(String),

    /// Response body could not be parsed.
    #[error("failed to parse SOAP response")]
    Parse,
}

pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// True for transport/HTTP-level errors worth retrying. SOAP faults are
    /// not retried — they're the device telling us the call itself failed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::HttpStatus(status, _) => *status >= 500,
            Self::Fault(_) | Self::Parse => false,
        }
    }
}

/// Entity-escapes `& < > " '` for embedding a value inside XML content.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Extracts the first occurrence of `<tag>...</tag>` text content, ignoring
/// any namespace prefix on the tag.
pub fn extract_xml_text(xml: &str, tag: &str) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    let target = tag.as_bytes();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == target => {
                if let Ok(text) = reader.read_text(e.name()) {
                    return Some(html_escape::decode_html_entities(&text).into_owned());
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    None
}

fn extract_fault(xml: &str) -> Option<String> {
    let code = extract_xml_text(xml, "errorCode");
    let desc = extract_xml_text(xml, "errorDescription");
    match (code, desc) {
        (Some(c), Some(d)) => Some(format!("{c}: {d}")),
        (Some(c), None) => Some(c),
        (None, Some(d)) => Some(d),
        (None, None) => extract_xml_text(xml, "faultstring"),
    }
}

/// Sends a single SOAP action to `url` with no retry.
///
/// `url` is the absolute control URL resolved from the device description.
pub async fn send_soap_request(
    client: &Client,
    url: &str,
    service: DlnaService,
    action: &str,
    args: &[(&str, &str)],
) -> SoapResult<String> {
    let urn = service.urn();

    let mut body = format!(
        r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{urn}">"#,
    );
    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }
    body.push_str(&format!("</u:{action}></s:Body></s:Envelope>"));

    log::debug!("[Dlna] SOAP request {} to {} ({} bytes)", action, url, body.len());

    let response = client
        .post(url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{urn}#{action}\""))
        .body(body)
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if let Some(fault) = extract_fault(&text) {
        if text.contains("<errorCode>") || text.contains("Fault") {
            log::warn!("[Dlna] SOAP fault on {}: {}", action, fault);
            return Err(SoapError::Fault(fault));
        }
    }

    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), text));
    }

    Ok(text)
}

/// Sends a SOAP action, retrying transient failures `max_retries` times with
/// a fixed 2 s backoff between attempts.
pub async fn send_with_retry(
    client: &Client,
    url: &str,
    service: DlnaService,
    action: &str,
    args: &[(&str, &str)],
    max_retries: u32,
) -> SoapResult<String> {
    let mut last_err = None;
    for attempt in 0..max_retries.max(1) {
        if attempt > 0 {
            log::info!("[Dlna] retrying {} (attempt {})", action, attempt);
            tokio::time::sleep(Duration::from_millis(SOAP_RETRY_DELAY_MS)).await;
        }
        match send_soap_request(client, url, service, action, args).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transient() => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// Fluent builder mirroring the shape of the underlying SOAP call, reducing
/// argument-order mistakes at call sites.
pub struct SoapRequestBuilder<'a> {
    client: &'a Client,
    url: &'a str,
    service: Option<DlnaService>,
    action: Option<&'a str>,
    args: Vec<(&'a str, String)>,
    max_retries: u32,
}

impl<'a> SoapRequestBuilder<'a> {
    #[must_use]
    pub fn new(client: &'a Client, url: &'a str) -> Self {
        Self {
            client,
            url,
            service: None,
            action: None,
            args: Vec::new(),
            max_retries: SOAP_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn service(mut self, service: DlnaService) -> Self {
        self.service = Some(service);
        self
    }

    #[must_use]
    pub fn action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn arg(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.args.push((key, value.into()));
        self
    }

    #[must_use]
    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", "0")
    }

    /// Caps retries at 1 — used for volume calls, where a stale in-flight
    /// retry would only fight with the next debounced send.
    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.max_retries = 1;
        self
    }

    pub async fn send(self) -> SoapResult<String> {
        let service = self
            .service
            .ok_or_else(|| SoapError::Fault("SoapRequestBuilder: service not set".into()))?;
        let action = self
            .action
            .ok_or_else(|| SoapError::Fault("SoapRequestBuilder: action not set".into()))?;
        let args: Vec<(&str, &str)> = self.args.iter().map(|(k, v)| (*k, v.as_str())).collect();

        send_with_retry(self.client, self.url, service, action, &args, self.max_retries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_all_five_entities() {
        assert_eq!(
            escape_xml(r#"Tom & Jerry <"'>"#),
            "Tom &amp; Jerry &lt;&quot;&apos;&gt;"
        );
    }

    #[test]
    fn extracts_text_ignoring_namespace_prefix() {
        let xml = "<u:GetVolumeResponse xmlns:u=\"x\"><CurrentVolume>42</CurrentVolume></u:GetVolumeResponse>";
        assert_eq!(extract_xml_text(xml, "CurrentVolume"), Some("42".into()));
    }

    #[test]
    fn extract_fault_prefers_code_and_description() {
        let xml = "<s:Fault><errorCode>701</errorCode><errorDescription>Transition not available</errorDescription></s:Fault>";
        assert_eq!(
            extract_fault(xml),
            Some("701: Transition not available".into())
        );
    }

    #[test]
    fn http_status_5xx_is_transient() {
        assert!(SoapError::HttpStatus(503, String::new()).is_transient());
        assert!(!SoapError::HttpStatus(404, String::new()).is_transient());
    }

    #[test]
    fn fault_is_never_transient() {
        assert!(!SoapError::Fault("701".into()).is_transient());
    }

    #[test]
    fn builder_without_service_fails_fast() {
        let client = Client::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = rt.block_on(
            SoapRequestBuilder::new(&client, "http://127.0.0.1:1400/x")
                .action("Play")
                .send(),
        );
        assert!(matches!(result, Err(SoapError::Fault(_))));
    }
}
