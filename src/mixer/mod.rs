//! Mixer control
//!
//! Applies a volume to an ALSA mixer control by running `amixer cset`.
//! Each call is a single bounded invocation: no retry, and the child is
//! killed if it outlives the configured timeout.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::config::MixerConfig;


/// Inclusive volume range accepted by the mixer control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeRange {
    pub min: i64,
    pub max: i64,
}

impl VolumeRange {
    /// Create a range; callers guarantee `min <= max` (checked by config validation)
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Constrain a value to the range
    pub fn clamp(&self, volume: i64) -> i64 {
        volume.max(self.min).min(self.max)
    }

    pub fn contains(&self, volume: i64) -> bool {
        (self.min..=self.max).contains(&volume)
    }
}

/// How the mixer control is addressed on the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAddress {
    /// Numeric control id (`numid=N`), preferred
    NumId(String),
    /// Control name (`name=...`), fallback; names vary between drivers
    Name(String),
}

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAddress::NumId(id) => write!(f, "numid={}", id),
            ControlAddress::Name(name) => write!(f, "name={}", name),
        }
    }
}

/// Errors from a single mixer invocation
#[derive(Debug)]
pub enum MixerError {
    /// The mixer binary does not exist
    NotFound(PathBuf),
    /// The mixer exited unsuccessfully (`code` is `None` when killed by a signal)
    Failed { code: Option<i32>, output: String },
    /// The mixer did not finish in time and was killed
    Timeout(Duration),
    /// The mixer could not be started
    Spawn(std::io::Error),
}

impl fmt::Display for MixerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixerError::NotFound(path) => write!(f, "{} not found", path.display()),
            MixerError::Failed {
                code: Some(code), ..
            } => write!(f, "exit {}", code),
            MixerError::Failed { code: None, .. } => write!(f, "terminated by signal"),
            MixerError::Timeout(d) => write!(f, "timed out after {:?}", d),
            MixerError::Spawn(e) => write!(f, "failed to start: {}", e),
        }
    }
}

impl std::error::Error for MixerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MixerError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

/// A volume sink the bridge can drive
#[async_trait]
pub trait VolumeControl: Send + Sync {
    /// Range values are clamped to before being applied
    fn range(&self) -> VolumeRange;

    /// Apply a volume, returning whether the control accepted it.
    ///
    /// Failures are logged by the implementation.
    async fn apply(&self, volume: i64) -> bool;
}

/// `amixer` driven mixer control
#[derive(Debug, Clone)]
pub struct Amixer {
    binary: PathBuf,
    card: String,
    control: ControlAddress,
    range: VolumeRange,
    timeout: Duration,
}

impl Amixer {
    pub fn new(
        binary: impl Into<PathBuf>,
        card: impl Into<String>,
        control: ControlAddress,
        range: VolumeRange,
        timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            card: card.into(),
            control,
            range,
            timeout,
        }
    }

    pub fn from_config(config: &MixerConfig) -> Self {
        Self::new(
            config.binary.clone(),
            config.card.clone(),
            config.control_address(),
            config.range(),
            config.timeout,
        )
    }

    pub fn control(&self) -> &ControlAddress {
        &self.control
    }

    /// Arguments for setting `volume`
    pub fn args(&self, volume: i64) -> Vec<String> {
        vec![
            "-c".to_string(),
            self.card.clone(),
            "cset".to_string(),
            self.control.to_string(),
            volume.to_string(),
        ]
    }

    /// Printable command line, for logs
    pub fn command_line(&self, volume: i64) -> String {
        let mut line = self.binary.display().to_string();
        for arg in self.args(volume) {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }

    /// Run the mixer once and return its combined output (stdout, then stderr)
    pub async fn run(&self, volume: i64) -> Result<String, MixerError> {
        let mut command = Command::new(&self.binary);
        command
            .args(self.args(volume))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running {}", self.command_line(volume));

        let output = match timeout(self.timeout, command.output()).await {
            Err(_) => return Err(MixerError::Timeout(self.timeout)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MixerError::NotFound(self.binary.clone()))
            }
            Ok(Err(e)) => return Err(MixerError::Spawn(e)),
            Ok(Ok(output)) => output,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim().to_string();

        if output.status.success() {
            Ok(text)
        } else {
            Err(MixerError::Failed {
                code: output.status.code(),
                output: text,
            })
        }
    }
}

#[async_trait]
impl VolumeControl for Amixer {
    fn range(&self) -> VolumeRange {
        self.range
    }

    async fn apply(&self, volume: i64) -> bool {
        let volume = self.range.clamp(volume);

        match self.run(volume).await {
            Ok(output) => {
                if !output.is_empty() {
                    info!("{}", output);
                }
                true
            }
            Err(MixerError::Failed { code, output }) => {
                match code {
                    Some(code) => error!(
                        "amixer failed (exit {}): {}",
                        code,
                        self.command_line(volume)
                    ),
                    None => error!(
                        "amixer terminated by signal: {}",
                        self.command_line(volume)
                    ),
                }
                if !output.is_empty() {
                    error!("{}", output);
                }
                false
            }
            Err(e @ MixerError::NotFound(_)) => {
                error!("amixer binary {}", e);
                false
            }
            Err(e) => {
                error!("amixer {}: {}", e, self.command_line(volume));
                false
            }
        }
    }
}
