//! Configuration Vault – reads/writes `~/.rosmcp/config.toml`.

use rosmcp_middleware::ToolsConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Persisted user configuration stored in `~/.rosmcp/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Host running `rosbridge_server`.
    #[serde(default = "default_bridge_host")]
    pub bridge_host: String,

    /// rosbridge WebSocket port.
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    #[serde(default = "default_cmd_vel_topic")]
    pub cmd_vel_topic: String,

    #[serde(default = "default_front_camera_topic")]
    pub front_camera_topic: String,

    #[serde(default = "default_back_camera_topic")]
    pub back_camera_topic: String,

    /// Where `/capture` writes files when no path is given.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Base64 budget for a single camera image, in KB.
    #[serde(default = "default_max_image_kb")]
    pub max_image_kb: f64,

    /// Per-image base64 budget when both cameras are captured, in KB.
    #[serde(default = "default_pair_max_image_kb")]
    pub pair_max_image_kb: f64,

    /// Starting JPEG quality (1-100).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// How long `/sample` waits for a message, in seconds.
    #[serde(default = "default_sample_timeout_secs")]
    pub sample_timeout_secs: f64,
}

fn default_bridge_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bridge_port() -> u16 {
    9090
}
fn default_cmd_vel_topic() -> String {
    "/kachaka/manual_control/cmd_vel".to_string()
}
fn default_front_camera_topic() -> String {
    "/kachaka/front_camera/image_raw".to_string()
}
fn default_back_camera_topic() -> String {
    "/kachaka/back_camera/image_raw".to_string()
}
fn default_output_dir() -> String {
    "screenshots".to_string()
}
fn default_max_image_kb() -> f64 {
    700.0
}
fn default_pair_max_image_kb() -> f64 {
    400.0
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_sample_timeout_secs() -> f64 {
    3.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_host: default_bridge_host(),
            bridge_port: default_bridge_port(),
            cmd_vel_topic: default_cmd_vel_topic(),
            front_camera_topic: default_front_camera_topic(),
            back_camera_topic: default_back_camera_topic(),
            output_dir: default_output_dir(),
            max_image_kb: default_max_image_kb(),
            pair_max_image_kb: default_pair_max_image_kb(),
            jpeg_quality: default_jpeg_quality(),
            sample_timeout_secs: default_sample_timeout_secs(),
        }
    }
}

impl Config {
    /// `ws://host:port` for the configured bridge.
    pub fn bridge_url(&self) -> String {
        format!("ws://{}:{}", self.bridge_host, self.bridge_port)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(format!("jpeg_quality must be 1-100, got {}", self.jpeg_quality));
        }
        for (name, kb) in [
            ("max_image_kb", self.max_image_kb),
            ("pair_max_image_kb", self.pair_max_image_kb),
        ] {
            if !kb.is_finite() || kb <= 0.0 {
                return Err(format!("{name} must be a positive number, got {kb}"));
            }
        }
        if Duration::try_from_secs_f64(self.sample_timeout_secs).is_err() {
            return Err(format!(
                "sample_timeout_secs must be a non-negative number of seconds in range, got {}",
                self.sample_timeout_secs
            ));
        }
        Ok(())
    }

    /// Settings handed to the tool facade.
    pub fn tools_config(&self) -> ToolsConfig {
        let defaults = ToolsConfig::default();
        ToolsConfig {
            bridge_url: self.bridge_url(),
            cmd_vel_topic: self.cmd_vel_topic.clone(),
            front_camera_topic: self.front_camera_topic.clone(),
            back_camera_topic: self.back_camera_topic.clone(),
            output_dir: PathBuf::from(&self.output_dir),
            max_image_kb: self.max_image_kb,
            pair_max_image_kb: self.pair_max_image_kb,
            jpeg_quality: self.jpeg_quality,
            sample_timeout: Duration::try_from_secs_f64(self.sample_timeout_secs)
                .unwrap_or(defaults.sample_timeout),
        }
    }
}

/// Return the path to `~/.rosmcp/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rosmcp").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let Some(mut cfg) = load_from(&config_path())? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Load the config from a specific path, without environment overrides.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `ROSMCP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROSMCP_BRIDGE_HOST` | `bridge_host` |
/// | `ROSMCP_BRIDGE_PORT` | `bridge_port` |
/// | `ROSMCP_OUTPUT_DIR` | `output_dir` |
/// | `ROSMCP_CMD_VEL_TOPIC` | `cmd_vel_topic` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROSMCP_BRIDGE_HOST") {
        cfg.bridge_host = v;
    }
    if let Ok(v) = std::env::var("ROSMCP_BRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>() {
            cfg.bridge_port = port;
        }
    if let Ok(v) = std::env::var("ROSMCP_OUTPUT_DIR") {
        cfg.output_dir = v;
    }
    if let Ok(v) = std::env::var("ROSMCP_CMD_VEL_TOPIC") {
        cfg.cmd_vel_topic = v;
    }
}

/// Save the config to disk, creating `~/.rosmcp/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    cfg.validate()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Serialises tests that mutate `ROSMCP_*` variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.bridge_port, 9090);
        assert_eq!(loaded.front_camera_topic, "/kachaka/front_camera/image_raw");
        assert_eq!(loaded.max_image_kb, 700.0);
        assert_eq!(loaded.jpeg_quality, 85);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bridge_port = 9191\ncmd_vel_topic = \"/cmd_vel\"\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.bridge_port, 9191);
        assert_eq!(loaded.cmd_vel_topic, "/cmd_vel");
        assert_eq!(loaded.back_camera_topic, default_back_camera_topic());
        assert_eq!(loaded.pair_max_image_kb, 400.0);
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "jpeg_quality = 0\n").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("jpeg_quality"), "{err}");

        let cfg = Config {
            max_image_kb: -1.0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_path_points_to_rosmcp_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".rosmcp"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn tools_config_carries_endpoint_and_budgets() {
        let cfg = Config {
            bridge_host: "robot.local".to_string(),
            bridge_port: 9091,
            sample_timeout_secs: 1.5,
            ..Config::default()
        };
        let tools = cfg.tools_config();
        assert_eq!(tools.bridge_url, "ws://robot.local:9091");
        assert_eq!(tools.output_dir, PathBuf::from("screenshots"));
        assert_eq!(tools.pair_max_image_kb, 400.0);
        assert_eq!(tools.sample_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn apply_env_overrides_changes_bridge_host() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: ENV_LOCK serialises every test that touches ROSMCP_* variables.
        unsafe { std::env::set_var("ROSMCP_BRIDGE_HOST", "10.0.0.7") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge_host, "10.0.0.7");
        unsafe { std::env::remove_var("ROSMCP_BRIDGE_HOST") };
    }

    #[test]
    fn apply_env_overrides_parses_bridge_port() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: ENV_LOCK serialises every test that touches ROSMCP_* variables.
        unsafe { std::env::set_var("ROSMCP_BRIDGE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge_port, 9090);

        unsafe { std::env::set_var("ROSMCP_BRIDGE_PORT", "9999") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge_port, 9999);
        unsafe { std::env::remove_var("ROSMCP_BRIDGE_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_output_dir_and_topic() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: ENV_LOCK serialises every test that touches ROSMCP_* variables.
        unsafe {
            std::env::set_var("ROSMCP_OUTPUT_DIR", "/tmp/shots");
            std::env::set_var("ROSMCP_CMD_VEL_TOPIC", "/robot/cmd_vel");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.output_dir, "/tmp/shots");
        assert_eq!(cfg.cmd_vel_topic, "/robot/cmd_vel");
        unsafe {
            std::env::remove_var("ROSMCP_OUTPUT_DIR");
            std::env::remove_var("ROSMCP_CMD_VEL_TOPIC");
        }
    }
}
