//! Local audio output backend: a `cpal` device rendered to directly from a
//! decoded, ring-buffered track, rather than a DLNA renderer on the network (§4.12).

pub mod backend;
pub mod decode;
pub mod device;
pub mod ring_buffer;

pub use backend::LocalBackend;
pub use device::{format_device_list, list_audio_devices, resolve_device, AudioDeviceInfo};
