//! Volume Bridge
//!
//! Connects to the broker, subscribes to the device and broadcast command
//! topics and turns every command into a mixer call. The applied volume is
//! published back on the device state topic.
//!
//! # Connection states
//!
//! ```text
//! Disconnected -> Connecting -> Serving
//!      ^              |            |
//!      +--------------+------------+
//! ```
//!
//! [`Bridge::cycle`] runs exactly one pass through the diagram and reports
//! how it ended. [`Bridge::run`] repeats cycles forever, sleeping between
//! them for the delay chosen by [`Bridge::retry_delay`].


use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::{BusError, Connector, FailureKind, Message, Session};
use crate::command::parse_volume;
use crate::config::{Config, ReconnectConfig, StateConfig};
use crate::mixer::VolumeControl;
use crate::protocol::QoS;
use crate::topic::Topics;

/// Connection state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    /// No session; waiting to reconnect
    #[default]
    Disconnected,
    /// Connect attempt in progress
    Connecting,
    /// Session established, handling commands
    Serving,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Disconnected => write!(f, "disconnected"),
            BridgeState::Connecting => write!(f, "connecting"),
            BridgeState::Serving => write!(f, "serving"),
        }
    }
}

/// How a connection cycle ended
#[derive(Debug)]
pub enum CycleOutcome {
    /// The connect attempt itself failed
    ConnectFailed(BusError),
    /// An established session ended after serving for `served`
    SessionLost { error: BusError, served: Duration },
}

impl CycleOutcome {
    pub fn error(&self) -> &BusError {
        match self {
            CycleOutcome::ConnectFailed(error) => error,
            CycleOutcome::SessionLost { error, .. } => error,
        }
    }
}

/// Doubling delay between `min` and `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Return the current delay and advance to the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// The volume bridge
pub struct Bridge<C: Connector, M: VolumeControl> {
    connector: C,
    mixer: M,
    topics: Topics,
    device: String,
    qos: QoS,
    state_publish: StateConfig,
    reconnect: ReconnectConfig,
    backoff: Backoff,
    /// Set once a served session has been lost; later connect failures back off
    reconnecting: bool,
    state: Arc<RwLock<BridgeState>>,
}

impl<C: Connector, M: VolumeControl> Bridge<C, M> {
    pub fn new(
        connector: C,
        mixer: M,
        topics: Topics,
        device: impl Into<String>,
        config: &Config,
    ) -> Self {
        let reconnect = config.reconnect.clone();
        Self {
            connector,
            mixer,
            topics,
            device: device.into(),
            qos: config.mqtt.qos(),
            state_publish: config.state.clone(),
            backoff: Backoff::new(reconnect.min_backoff, reconnect.max_backoff),
            reconnect,
            reconnecting: false,
            state: Arc::new(RwLock::new(BridgeState::Disconnected)),
        }
    }

    /// Shared handle on the connection state
    pub fn state_handle(&self) -> Arc<RwLock<BridgeState>> {
        self.state.clone()
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    fn set_state(&self, state: BridgeState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!("Bridge state {} -> {}", previous, state);
        }
    }

    /// Run forever, reconnecting after every failure
    pub async fn run(&mut self) {
        loop {
            let outcome = self.cycle().await;
            let delay = self.retry_delay(&outcome);

            match outcome.error().kind() {
                FailureKind::Rejected => error!(
                    "MQTT loop error: {}. Reconnecting in {:?} (check credentials and client id)",
                    outcome.error(),
                    delay
                ),
                FailureKind::Transient => warn!(
                    "MQTT loop error: {}. Reconnecting in {:?}",
                    outcome.error(),
                    delay
                ),
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// One connect, subscribe and serve pass. Always ends Disconnected.
    pub async fn cycle(&mut self) -> CycleOutcome {
        self.set_state(BridgeState::Connecting);
        debug!("Connecting to MQTT {}", self.connector.address());

        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.set_state(BridgeState::Disconnected);
                return CycleOutcome::ConnectFailed(e);
            }
        };

        self.set_state(BridgeState::Serving);
        info!(
            "Connected to MQTT {} as {}",
            self.connector.address(),
            self.device
        );

        let started = Instant::now();
        let error = match self.serve(&mut session).await {
            Ok(never) => match never {},
            Err(e) => e,
        };

        self.set_state(BridgeState::Disconnected);
        CycleOutcome::SessionLost {
            error,
            served: started.elapsed(),
        }
    }

    /// Delay before the next cycle
    ///
    /// Failed connects wait the fixed retry delay until a session has been
    /// lost once; after that they keep advancing the backoff. A broker that
    /// refused our credentials or identity waits the maximum backoff. Lost
    /// sessions back off, restarting from the minimum once a session has
    /// stayed up for at least the maximum backoff.
    pub fn retry_delay(&mut self, outcome: &CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::ConnectFailed(e) => match e.kind() {
                FailureKind::Rejected => self.reconnect.max_backoff,
                FailureKind::Transient if self.reconnecting => self.backoff.next_delay(),
                FailureKind::Transient => self.reconnect.retry_delay,
            },
            CycleOutcome::SessionLost { served, .. } => {
                self.reconnecting = true;
                if *served >= self.reconnect.max_backoff {
                    self.backoff.reset();
                }
                self.backoff.next_delay()
            }
        }
    }

    async fn serve(&self, session: &mut C::Session) -> Result<Infallible, BusError> {
        let subscriptions = self.topics.subscriptions(self.qos);
        session.subscribe(&subscriptions).await?;

        let names: Vec<&str> = subscriptions.iter().map(|(t, _)| t.as_str()).collect();
        info!("Subscribed: {}", names.join(", "));

        loop {
            let message = session.next_message().await?;
            self.handle_message(session, message).await?;
        }
    }

    /// Apply one volume command. Only bus failures are returned.
    async fn handle_message(
        &self,
        session: &mut C::Session,
        message: Message,
    ) -> Result<(), BusError> {
        let Some(requested) = parse_volume(&message.payload) else {
            warn!(
                "Ignoring invalid payload on {}: {:?}",
                message.topic, message.payload
            );
            return Ok(());
        };

        let volume = self.mixer.range().clamp(requested);
        if !self.mixer.apply(volume).await {
            return Ok(());
        }
        info!("Set volume={} (topic={})", volume, message.topic);

        if self.state_publish.publish {
            session
                .publish(
                    &self.topics.state,
                    Bytes::from(volume.to_string()),
                    self.qos,
                    self.state_publish.retain,
                )
                .await?;
        }
        Ok(())
    }
}
