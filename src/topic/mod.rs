//! Topic naming for the volume bridge
//!
//! Each device listens on its own command topic and on a broadcast
//! command topic shared by every device under the same prefix, and
//! reports its state on a per-device state topic:
//!
//! ```text
//! {base}/{device}/set/volume     subscribe
//! {base}/all/set/volume          subscribe
//! {base}/{device}/state/volume   publish
//! ```

pub mod validation;

pub use validation::{validate_topic_level, validate_topic_name};

use crate::protocol::QoS;

/// Device segment used for the broadcast command topic
pub const BROADCAST_DEVICE: &str = "all";

/// Short host name of this machine (everything before the first `.`)
pub fn device_name() -> std::io::Result<String> {
    let name = hostname::get()?;
    Ok(short_name(&name.to_string_lossy()).to_string())
}

fn short_name(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

/// The three topics derived from a base prefix and a device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Device-specific command topic
    pub device_set: String,
    /// Broadcast command topic
    pub all_set: String,
    /// Device state topic
    pub state: String,
}

impl Topics {
    pub fn new(base: &str, device: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            device_set: format!("{}/{}/set/volume", base, device),
            all_set: format!("{}/{}/set/volume", base, BROADCAST_DEVICE),
            state: format!("{}/{}/state/volume", base, device),
        }
    }

    /// Check every derived topic is a valid concrete topic name
    pub fn validate(&self) -> Result<(), &'static str> {
        validate_topic_name(&self.device_set)?;
        validate_topic_name(&self.all_set)?;
        validate_topic_name(&self.state)
    }

    /// Command topics to subscribe to, each at the given QoS
    pub fn subscriptions(&self, qos: QoS) -> Vec<(String, QoS)> {
        vec![(self.device_set.clone(), qos), (self.all_set.clone(), qos)]
    }
}
