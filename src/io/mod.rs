//! IO modules - external system interfaces
//!
//! This module contains all collaborator capabilities and their backends:
//! - `detections` - Tracked-detection stream trait and JSONL replay backend
//! - `mqtt` - Detection stream fed by an external tracker over MQTT
//! - `frames` - High-resolution frame source (image sequence)
//! - `file_sink` - JPEG evidence writer
//! - `exif` - EXIF ImageDescription encoder
//! - `config_store` - Event-scoped key/value config (HTTP or JSON file)
//! - `status` - Operator status log (HTTP or JSON file)
//! - `users` - Login against the user service
//! - `events` - Race event lookup and selection
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod config_store;
pub mod detections;
pub mod events;
pub mod exif;
pub mod file_sink;
pub mod frames;
pub mod mqtt;
pub mod prometheus;
pub mod status;
pub mod users;

// Re-export commonly used types
pub use config_store::{ConfigStore, HttpConfigStore, JsonFileConfigStore};
pub use detections::{DetectionStream, ReplayOpener, StreamOpener, TrackingParams};
pub use events::{select_event, EventsClient};
pub use file_sink::{FileSink, JpegFileSink};
pub use frames::{FrameSource, ImageSequenceSource};
pub use mqtt::{MqttOpener, MqttStreamConfig};
pub use status::{HttpStatusSink, JsonFileStatusLog, StatusSink};
pub use users::{Credentials, UserClient};
