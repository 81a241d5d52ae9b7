use std::time::Duration;

use serde::{Deserialize, Serialize};
use tile_bridge_core::agent::AgentConfig;
use tile_bridge_core::player::PlayerConfig;
use tile_bridge_core::state::TrackerConfig;

use crate::config_loader::ConfigLoader;
use crate::orchestrator::Mode;

pub const CONFIG_FILE: &str = "tile_bridge.toml";

/// Everything read from `tile_bridge.toml`. Every field has a default, so an empty or missing
/// file runs the bridge in observe mode on localhost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeSection,
    pub tracker: TrackerConfig,
    pub agent: AgentConfig,
    pub autoplay: PlayerConfig,
    pub input: InputSection,
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub control_listen: String,
    pub mode: Mode,
    /// Local fallback for a call window the server never closes.
    pub call_window_timeout_ms: u64,
    pub frame_queue: usize,
    pub event_buffer: usize,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            control_listen: "127.0.0.1:28670".to_string(),
            mode: Mode::Observe,
            call_window_timeout_ms: 10_000,
            frame_queue: 1024,
            event_buffer: 256,
        }
    }
}

impl BridgeSection {
    pub fn call_window_timeout(&self) -> Duration {
        Duration::from_millis(self.call_window_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSection {
    /// Browser-automation driver. Autoplay is unavailable without one.
    pub driver_addr: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    /// Reads [`CONFIG_FILE`] (or defaults) and applies environment overrides.
    pub fn load() -> anyhow::Result<(Self, Option<std::path::PathBuf>)> {
        let (mut cfg, path): (Config, _) = ConfigLoader::parse_or_default(CONFIG_FILE)?;
        cfg.apply_env();
        Ok((cfg, path))
    }

    pub fn apply_env(&mut self) {
        if let Some(addr) = env_override("TILE_BRIDGE_CONTROL_ADDR") {
            self.bridge.control_listen = addr;
        }
        if let Some(addr) = env_override("TILE_BRIDGE_AGENT_ADDR") {
            self.agent.addr = addr;
        }
        if let Some(addr) = env_override("TILE_BRIDGE_INPUT_ADDR") {
            self.input.driver_addr = Some(addr);
        }
    }
}
