//! Runtime options and configuration loading.
//!
//! Options come from an optional TOML file. Everything has a default, so an
//! empty file (or no file) gives a working setup:
//!
//! ```toml
//! audio-buffers = 512
//! video-sync = false
//! audio-sync = true
//! scale = 3
//!
//! [bindings.keyboard]
//! KeyX = "A"
//! KeyZ = "B"
//!
//! [bindings.gamepad]
//! South = "A"
//! ```
//!
//! Bindings are resolved into an [`InputBindingTable`] up front; nothing
//! downstream reads the raw tables.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use emu_core::{Button, KeyCode};
use serde::Deserialize;

use crate::error::{ConfigError, StartupError};
use crate::input::{GamepadButton, HostInput, InputBindingTable};

/// Options shared by the worker and the host runloop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeOptions {
    /// Audio device buffer size in sample frames.
    pub audio_buffers: u32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
    /// Worker waits for the host to take frames instead of dropping them.
    pub video_sync: bool,
    /// Worker waits for the audio device to drain samples before pushing.
    pub audio_sync: bool,
    /// Viewport width in emulated pixels.
    pub width: u32,
    /// Viewport height in emulated pixels.
    pub height: u32,
    /// Integer window scale.
    pub scale: u32,
    pub fullscreen: bool,
    /// Completed frames the surface holds before dropping or blocking.
    pub frame_queue_depth: usize,
    /// Longest the runloop waits for a frame before servicing input again.
    pub poll_interval_ms: u64,
    /// Longest the worker waits on a sync point before moving on.
    pub sync_timeout_ms: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            audio_buffers: 512,
            sample_rate: 44_100,
            channels: 2,
            video_sync: false,
            audio_sync: true,
            width: 240,
            height: 160,
            scale: 3,
            fullscreen: false,
            frame_queue_depth: 3,
            poll_interval_ms: 5,
            sync_timeout_ms: 20,
        }
    }
}

impl RuntimeOptions {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Reject option sets that cannot run.
    pub fn validate(&self) -> Result<(), StartupError> {
        let problem = if self.width == 0 || self.height == 0 {
            Some(format!("viewport {}x{} is empty", self.width, self.height))
        } else if self.scale == 0 {
            Some("scale must be at least 1".to_string())
        } else if self.audio_buffers == 0 {
            Some("audio-buffers must be at least 1".to_string())
        } else if self.sample_rate == 0 {
            Some("sample-rate must be non-zero".to_string())
        } else if self.channels == 0 {
            Some("channels must be at least 1".to_string())
        } else if self.frame_queue_depth == 0 {
            Some("frame-queue-depth must be at least 1".to_string())
        } else if self.poll_interval_ms == 0 {
            Some("poll-interval-ms must be non-zero".to_string())
        } else {
            None
        };
        match problem {
            Some(message) => Err(StartupError::InvalidOptions(message)),
            None => Ok(()),
        }
    }
}

/// Raw binding tables as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BindingsConfig {
    pub keyboard: HashMap<KeyCode, Button>,
    pub gamepad: HashMap<GamepadButton, Button>,
}

/// Everything a config file can contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    #[serde(flatten)]
    pub options: RuntimeOptions,
    pub bindings: BindingsConfig,
}

impl HostConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(text)?;
        config.options.validate()?;
        Ok(config)
    }

    /// Default bindings with the file's entries layered on top.
    #[must_use]
    pub fn resolve_bindings(&self) -> InputBindingTable {
        let mut table = InputBindingTable::defaults();
        for (&key, &button) in &self.bindings.keyboard {
            table.bind(HostInput::Key(key), button);
        }
        for (&pad, &button) in &self.bindings.gamepad {
            table.bind(HostInput::Gamepad(pad), button);
        }
        table
    }
}

/// Read a config file from disk.
pub fn load_config(path: &Path) -> Result<HostConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    HostConfig::from_toml(&text)
}
