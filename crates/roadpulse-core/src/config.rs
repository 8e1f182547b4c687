use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::Path;

use crate::model::RecordId;
use crate::model::traffic::CongestionThresholds;
use crate::session::Actor;

const MICROS_PER_SECOND: i64 = 1_000_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub karma: KarmaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_center_latitude")]
    pub center_latitude: f64,
    #[serde(default = "default_center_longitude")]
    pub center_longitude: f64,
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    /// Only samples newer than `now - window_secs` are shown.
    #[serde(default = "default_map_window_secs")]
    pub window_secs: i64,
    #[serde(default = "default_heavy_threshold")]
    pub heavy_threshold: u8,
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: u8,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center_latitude: default_center_latitude(),
            center_longitude: default_center_longitude(),
            zoom: default_zoom(),
            window_secs: default_map_window_secs(),
            heavy_threshold: default_heavy_threshold(),
            moderate_threshold: default_moderate_threshold(),
        }
    }
}

impl MapConfig {
    #[must_use]
    pub const fn thresholds(&self) -> CongestionThresholds {
        CongestionThresholds {
            heavy: self.heavy_threshold,
            moderate: self.moderate_threshold,
        }
    }

    #[must_use]
    pub const fn window_us(&self) -> i64 {
        self.window_secs.saturating_mul(MICROS_PER_SECOND)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_hourly_window_secs")]
    pub hourly_window_secs: i64,
    #[serde(default = "default_report_types_window_secs")]
    pub report_types_window_secs: i64,
    /// Fixed offset used to derive hour-of-day buckets. `None` means the
    /// caller's local offset.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            hourly_window_secs: default_hourly_window_secs(),
            report_types_window_secs: default_report_types_window_secs(),
            utc_offset_minutes: None,
        }
    }
}

impl DashboardConfig {
    #[must_use]
    pub const fn hourly_window_us(&self) -> i64 {
        self.hourly_window_secs.saturating_mul(MICROS_PER_SECOND)
    }

    #[must_use]
    pub const fn report_types_window_us(&self) -> i64 {
        self.report_types_window_secs
            .saturating_mul(MICROS_PER_SECOND)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KarmaConfig {
    #[serde(default = "default_points_per_report")]
    pub points_per_report: i64,
    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: usize,
    #[serde(default = "default_progress_step")]
    pub progress_step: i64,
}

impl Default for KarmaConfig {
    fn default() -> Self {
        Self {
            points_per_report: default_points_per_report(),
            leaderboard_limit: default_leaderboard_limit(),
            progress_step: default_progress_step(),
        }
    }
}

/// The signed-in actor as recorded in the user config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ActorConfig {
    #[must_use]
    pub fn to_actor(&self) -> Actor {
        Actor {
            uid: RecordId::from(self.uid.as_str()),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub actor: Option<ActorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

impl ProjectConfig {
    /// Reject settings that would make the views misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.map.moderate_threshold >= self.map.heavy_threshold {
            bail!(
                "map.moderate_threshold ({}) must be below map.heavy_threshold ({})",
                self.map.moderate_threshold,
                self.map.heavy_threshold
            );
        }
        if self.map.heavy_threshold > 100 {
            bail!("map.heavy_threshold must be a percentage (0-100)");
        }
        if self.map.window_secs <= 0
            || self.dashboard.hourly_window_secs <= 0
            || self.dashboard.report_types_window_secs <= 0
        {
            bail!("time windows must be positive");
        }
        if self.karma.leaderboard_limit == 0 {
            bail!("karma.leaderboard_limit must be > 0");
        }
        if self.karma.progress_step <= 0 {
            bail!("karma.progress_step must be > 0");
        }
        Ok(())
    }
}

/// Load `.roadpulse/config.toml`, falling back to defaults when it is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed or validated.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".roadpulse/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(config)
}

/// Load the per-user config from `<config_dir>/roadpulse/config.toml`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("roadpulse/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Merge project config, user config and environment into one view.
///
/// # Errors
///
/// Returns an error if either config file is malformed.
pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.as_deref(), env_format.as_deref());

    Ok(EffectiveConfig {
        project,
        user,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_center_latitude() -> f64 {
    10.9942
}

const fn default_center_longitude() -> f64 {
    76.0062
}

const fn default_zoom() -> u8 {
    13
}

const fn default_map_window_secs() -> i64 {
    2 * 60 * 60
}

const fn default_heavy_threshold() -> u8 {
    70
}

const fn default_moderate_threshold() -> u8 {
    40
}

const fn default_hourly_window_secs() -> i64 {
    24 * 60 * 60
}

const fn default_report_types_window_secs() -> i64 {
    7 * 24 * 60 * 60
}

const fn default_points_per_report() -> i64 {
    10
}

const fn default_leaderboard_limit() -> usize {
    10
}

const fn default_progress_step() -> i64 {
    100
}
