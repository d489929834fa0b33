//! volmq - MQTT volume bridge for ALSA mixers
//!
//! Listens for volume commands on an MQTT broker, applies them to a mixer
//! control through `amixer` and reports the applied volume back.

pub mod bridge;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod mixer;
pub mod protocol;
pub mod topic;

pub use bridge::{Bridge, BridgeState};
pub use client::{MqttConnector, MqttSession};
pub use config::Config;
pub use mixer::{Amixer, VolumeControl, VolumeRange};
pub use protocol::QoS;
