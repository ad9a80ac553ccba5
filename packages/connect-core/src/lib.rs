//! Connect Core - shared library for the Connect Render headless player.
//!
//! This crate implements a device that joins a Connect control session,
//! receives playback commands over a WebSocket, and renders audio either to
//! a DLNA/UPnP renderer on the network or a local audio device.
//!
//! # Architecture
//!
//! - [`rest`]: vendor REST API client (login, session, track metadata/URLs)
//! - [`metadata`]: cache-through wrapper over the REST client
//! - [`codec`]: Connect protocol wire codec (outer frame, inner messages)
//! - [`session`]: the WebSocket session state machine
//! - [`commands`]: dispatches inbound inner messages to the player/queue
//! - [`player`]: single authority over playback state
//! - [`queue`]: the controller-synchronized play queue
//! - [`backend`]: the playback sink abstraction ([`dlna`] or [`local`])
//! - [`proxy`]: stable local URLs insulating a DLNA renderer from CDN URL expiry
//! - [`discovery`]: LAN mDNS advertisement and the HTTP handoff endpoint
//! - [`events`]: the domain event system feeding outbound Connect messages
//! - [`bootstrap`]: the composition root wiring everything together
//!
//! # Abstraction traits
//!
//! - [`backend::PlaybackBackend`]: decouples the player from DLNA vs. local output
//! - [`proxy::UpstreamUrlProvider`]: decouples the audio proxy from the metadata cache
//! - [`events::EventEmitter`]: decouples domain services from their transport

pub mod backend;
pub mod bootstrap;
pub mod codec;
pub mod commands;
pub mod discovery;
pub mod dlna;
pub mod error;
pub mod events;
pub mod local;
pub mod metadata;
pub mod network;
pub mod player;
pub mod protocol_constants;
pub mod proxy;
pub mod proxy_backend;
pub mod queue;
pub mod rest;
pub mod session;
pub mod state;
pub mod state_reporter;
pub mod tokens;
pub mod utils;

pub use backend::PlaybackBackend;
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use error::{ErrorCode, RenderError, RenderResult};
pub use events::{BroadcastEvent, BroadcastEventBridge, DlnaEvent, EventEmitter, LocalEvent, PlaybackEvent, SessionEvent};
pub use player::{Player, PlayerKind};
pub use queue::Queue;
pub use session::{DeviceInfo, Session};
pub use state::{BackendType, Config};
pub use tokens::{ConnectTokens, TokenStore};
pub use utils::{now_millis, validate_dlna_ip, IpValidationError};
