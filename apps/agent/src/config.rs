//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/treesync/agent.toml`
//! - Windows: `%APPDATA%/treesync/agent.toml`
//!
//! Queue and originals directories default to the per-user data directory
//! (`~/.local/share/treesync` on Linux, `%LOCALAPPDATA%/treesync` on Windows).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use treesync_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DISPATCH_INTERVAL, LEASE_TIMEOUT, MAX_RETRIES, NETWORK_COOLDOWN,
};
use treesync_queue::{QueueConfig, StaticRepoRegistry};

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of this agent, prefixed to its lease owner id (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory holding one JSON file per queued job.
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,

    /// Root of the originals mirror the staged files are read from.
    #[serde(default = "default_originals_dir")]
    pub originals_dir: PathBuf,

    /// Seconds between dispatch cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Files per chunk on a job's first attempt.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Attempts after which a job is retained instead of dispatched.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// How long a failed reachability probe suppresses further probes.
    #[serde(default = "default_network_cooldown_secs")]
    pub network_cooldown_secs: u64,

    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Repositories known to the editor integration.
    #[serde(default)]
    pub repos: Vec<RepoEntry>,
}

/// One tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub connected: bool,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "treesync-agent".into())
}

fn default_queue_dir() -> PathBuf {
    data_dir().join("queue")
}

fn default_originals_dir() -> PathBuf {
    data_dir().join("originals")
}

fn default_interval_secs() -> u64 {
    DISPATCH_INTERVAL.as_secs()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_lease_timeout_secs() -> u64 {
    LEASE_TIMEOUT.as_secs()
}

fn default_network_cooldown_secs() -> u64 {
    NETWORK_COOLDOWN.as_secs()
}

fn default_probe_url() -> String {
    "https://www.gstatic.com/generate_204".into()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            queue_dir: default_queue_dir(),
            originals_dir: default_originals_dir(),
            interval_secs: default_interval_secs(),
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            lease_timeout_secs: default_lease_timeout_secs(),
            network_cooldown_secs: default_network_cooldown_secs(),
            probe_url: default_probe_url(),
            probe_timeout_secs: default_probe_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            repos: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default there if not found.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn network_cooldown(&self) -> Duration {
        Duration::from_secs(self.network_cooldown_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            lease_timeout: self.lease_timeout(),
        }
    }

    pub fn repo_registry(&self) -> StaticRepoRegistry {
        StaticRepoRegistry::from_entries(
            self.repos
                .iter()
                .map(|repo| (repo.path.clone(), repo.connected)),
        )
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("treesync")
            .join("agent.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("treesync").join("agent.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/treesync/agent.toml"))
    }
}

/// Returns the platform-specific data directory.
fn data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("treesync")
    }

    #[cfg(target_os = "windows")]
    {
        let local = std::env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| "C:\\Users\\Default\\AppData\\Local".into());
        PathBuf::from(local).join("treesync")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/treesync")
    }
}
