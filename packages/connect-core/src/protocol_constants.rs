//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the vendor's Connect protocol and UPnP/DLNA
//! specifications; changing them would break wire compatibility.

// ─────────────────────────────────────────────────────────────────────────────
// Connect protocol (outer framing / session)
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket PING interval while a session is live (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 10;

/// Maximum time to wait for a PONG before treating the connection as lost (seconds).
pub const WS_PONG_TIMEOUT_SECS: u64 = 30;

/// Poll timeout for the inbound WebSocket receive loop (seconds).
///
/// Short enough that the token-expiry check runs promptly even with no traffic.
pub const WS_RECV_POLL_SECS: u64 = 1;

/// Initial reconnect backoff delay (seconds).
pub const RECONNECT_BACKOFF_INITIAL_SECS: u64 = 1;

/// Maximum reconnect backoff delay (seconds).
pub const RECONNECT_BACKOFF_MAX_SECS: u64 = 60;

/// Buffer window before `ws_token` expiry at which reconnect attempts stop (seconds).
pub const WS_TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Streaming URL / metadata lifetimes
// ─────────────────────────────────────────────────────────────────────────────

/// Nominal TTL of a vendor-issued streaming URL (seconds).
pub const STREAMING_URL_TTL_SECS: u64 = 300;

/// Safety margin applied before the audio proxy refreshes an upstream URL (seconds).
pub const PROXY_URL_REFRESH_MARGIN_SECS: u64 = 240;

/// Safety margin applied when the metadata cache decides to reuse a cached URL (seconds).
pub const METADATA_URL_REUSE_MARGIN_SECS: u64 = 30;

/// Metadata cache capacity (LRU, entries).
pub const METADATA_CACHE_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Player / queue
// ─────────────────────────────────────────────────────────────────────────────

/// Position threshold below which "previous track" restarts the current track
/// instead of moving the queue cursor back (milliseconds).
pub const PREVIOUS_TRACK_THRESHOLD_MS: i64 = 3000;

/// Number of upcoming queue positions kept preloaded (metadata + URL).
pub const PRELOAD_COUNT: usize = 3;

/// Interval between preload ticks (milliseconds).
pub const PRELOAD_TICK_MS: u64 = 1000;

/// Interval of the player's "playing" heartbeat state report (seconds).
pub const STATE_REPORT_HEARTBEAT_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// DLNA / UPnP
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for SOAP HTTP requests (seconds).
pub const SOAP_TIMEOUT_SECS: u64 = 10;

/// Maximum SOAP retry attempts for transient failures.
pub const SOAP_MAX_RETRIES: u32 = 3;

/// Fixed delay between SOAP retry attempts (milliseconds).
pub const SOAP_RETRY_DELAY_MS: u64 = 2000;

/// Minimum interval between actual `SetVolume` SOAP sends (milliseconds).
pub const VOLUME_DEBOUNCE_MS: u64 = 200;

/// Interval of the DLNA transport/position poll loop (milliseconds).
pub const DLNA_POLL_INTERVAL_MS: u64 = 2000;

/// Window after `Play` during which an observed `STOPPED` transport state is ignored (seconds).
pub const DLNA_STOPPED_GRACE_SECS: u64 = 5;

/// Capability cache TTL per device (seconds).
pub const CAPABILITY_CACHE_TTL_SECS: u64 = 24 * 3600;

// ─────────────────────────────────────────────────────────────────────────────
// Audio proxy
// ─────────────────────────────────────────────────────────────────────────────

/// Chunk size used when streaming proxied audio bodies (bytes).
pub const PROXY_CHUNK_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Local audio backend
// ─────────────────────────────────────────────────────────────────────────────

/// Ring buffer capacity, expressed in seconds of audio at the stream's sample rate.
pub const RING_BUFFER_SECONDS: u32 = 10;

/// Frames written per feeder loop iteration.
pub const FEEDER_CHUNK_FRAMES: usize = 8192;

/// Ring fill fraction above which the feeder yields instead of writing more.
pub const FEEDER_HIGH_WATERMARK: f32 = 0.8;

/// Feeder yield duration when above the high watermark (milliseconds).
pub const FEEDER_YIELD_MS: u64 = 50;

/// Feeder drain poll interval once the full track has been fed (milliseconds).
pub const FEEDER_DRAIN_POLL_MS: u64 = 100;

/// Ring fill fraction below which buffer status is reported as `low`.
pub const BUFFER_LOW_WATERMARK: f32 = 0.10;

/// Log an underrun warning every Nth occurrence, to avoid log spam.
pub const UNDERRUN_LOG_EVERY: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name advertised in LAN discovery and UPnP metadata.
pub const APP_NAME: &str = "Connect Render";

/// Service identifier for LAN discovery (`_qobuz-connect._tcp.local.` style record).
pub const SERVICE_ID: &str = "connect-render";

/// Broadcast channel capacity for internal domain events.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Discovery endpoint (§4.9/§6.3)
// ─────────────────────────────────────────────────────────────────────────────

/// mDNS/DNS-SD service type advertised on the LAN.
pub const MDNS_SERVICE_TYPE: &str = "_qobuz-connect._tcp.local.";

/// `sdk_version` TXT record value.
pub const DISCOVERY_SDK_VERSION: &str = concat!("rs-", env!("CARGO_PKG_VERSION"));

/// HTTP path prefix advertised in the mDNS `path` TXT key.
pub const DISCOVERY_HTTP_PATH: &str = "/streamcore";
