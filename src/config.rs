use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::read_to_string;

const CONFIG_FILE: &str = "Config.toml";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Root directory for the on-disk audio cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory containing sound effect clips, decoded at startup.
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: PathBuf,

    /// Number of concurrent fetch workers.
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// How many upcoming queue entries get eager metadata resolution.
    #[serde(default = "default_prefetch_horizon")]
    pub prefetch_horizon: usize,

    /// A fetch job exceeding this deadline is treated as a transient failure.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Retries for transient fetch failures before giving up on a track.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Scale tracks towards a consistent loudness at load time.
    #[serde(default)]
    pub normalise_audio: bool,

    /// Address the local PCM transport listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("audio_cache")
}

fn default_sounds_dir() -> PathBuf {
    PathBuf::from("sounds")
}

fn default_fetch_workers() -> usize {
    4
}

fn default_prefetch_horizon() -> usize {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_listen_addr() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: default_cache_dir(),
            sounds_dir: default_sounds_dir(),
            fetch_workers: default_fetch_workers(),
            prefetch_horizon: default_prefetch_horizon(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_retries: default_fetch_retries(),
            normalise_audio: false,
            listen_addr: default_listen_addr(),
        }
    }
}

impl Config {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Load `Config.toml`, falling back to defaults when it is absent.
pub async fn load() -> Result<Config> {
    match read_to_string(CONFIG_FILE).await {
        Ok(raw) => {
            let config: Config = toml::from_str(&raw)?;
            Ok(config)
        }
        Err(e) => {
            info!("No {CONFIG_FILE} found ({e}), using default configuration");
            Ok(Config::default())
        }
    }
}
