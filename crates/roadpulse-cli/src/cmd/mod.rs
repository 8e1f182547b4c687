pub mod completions;
pub mod dashboard;
pub mod init;
pub mod karma;
pub mod leaderboard;
pub mod map;
pub mod replay;
pub mod report;
pub mod sample;
pub mod sim;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use roadpulse_core::config::EffectiveConfig;
use roadpulse_core::error::ErrorCode;
use roadpulse_core::session::Session;
use roadpulse_core::store::{LocalStore, STORE_RELATIVE_PATH};

use crate::output::{CommandError, OutputMode};

/// Everything a project command needs besides its own arguments.
pub struct Context {
    pub output: OutputMode,
    pub session: Session,
    /// Wall clock for this invocation, µs since the epoch.
    pub now_us: i64,
    pub config: EffectiveConfig,
    pub project_root: PathBuf,
}

impl Context {
    /// Open the project's local store.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorCode::NotInitialized`] when `rp init` has not been
    /// run here, or when the store cannot be opened.
    pub fn open_store(&self) -> Result<LocalStore> {
        if !self.project_root.join(".roadpulse").is_dir() {
            return Err(CommandError::new(
                ErrorCode::NotInitialized,
                format!("no .roadpulse/ in {}", self.project_root.display()),
            )
            .into());
        }
        let path = self.project_root.join(STORE_RELATIVE_PATH);
        LocalStore::open(&path).with_context(|| format!("open store {}", path.display()))
    }
}

/// RFC 3339 form of a µs timestamp, or the raw number when out of range.
pub fn format_timestamp(ts_us: i64) -> String {
    chrono::DateTime::from_timestamp_micros(ts_us)
        .map_or_else(|| ts_us.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadpulse_core::config::{ProjectConfig, UserConfig};

    fn context(root: PathBuf) -> Context {
        Context {
            output: OutputMode::Text,
            session: Session::signed_out(),
            now_us: 0,
            config: EffectiveConfig {
                project: ProjectConfig::default(),
                user: UserConfig::default(),
                resolved_output: "text".into(),
            },
            project_root: root,
        }
    }

    #[test]
    fn open_store_requires_init() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = context(dir.path().to_path_buf())
            .open_store()
            .expect_err("not initialized");
        assert_eq!(
            crate::output::error_code_of(&err),
            Some(ErrorCode::NotInitialized)
        );
    }

    #[test]
    fn open_store_after_init_dir_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".roadpulse")).expect("mkdir");
        let store = context(dir.path().to_path_buf())
            .open_store()
            .expect("open");
        assert_eq!(store.subscription_count(), 0);
    }

    #[test]
    fn timestamps_format_as_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(i64::MAX), i64::MAX.to_string());
    }
}
