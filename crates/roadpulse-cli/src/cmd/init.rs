use anyhow::{Context as _, Result};
use clap::Args;
use roadpulse_core::config::ProjectConfig;
use roadpulse_core::store::migrations::LATEST_SCHEMA_VERSION;
use roadpulse_core::store::{LocalStore, STORE_RELATIVE_PATH};
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite the config template even if `.roadpulse/` already exists.
    #[arg(long)]
    pub force: bool,
}

const GITIGNORE: &str = "store.db\nstore.db-wal\nstore.db-shm\n";

const CONFIG_HEADER: &str = "# roadpulse project settings. Missing keys take their defaults.\n\n";

#[derive(Debug, Serialize)]
struct InitOutput {
    config: String,
    store: String,
    schema_version: u32,
    reinitialized: bool,
}

/// Execute `rp init`. Creates the project skeleton:
///
/// ```text
/// .roadpulse/
///   config.toml   (default project config)
///   .gitignore    (store.db and its WAL files)
///   store.db      (empty, migrated local store)
/// ```
///
/// An existing store is kept; `--force` only rewrites the config and
/// `.gitignore`.
///
/// # Errors
///
/// Returns an error if `.roadpulse/` already exists and `--force` is not set,
/// or if any filesystem or store operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let dir = project_root.join(".roadpulse");
    let existed = dir.exists();
    if existed && !args.force {
        anyhow::bail!(".roadpulse/ already exists. Use `rp init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let config_path = dir.join("config.toml");
    let body = toml::to_string_pretty(&ProjectConfig::default())
        .context("Failed to render default config")?;
    std::fs::write(&config_path, format!("{CONFIG_HEADER}{body}"))
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore_path = dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    let store_path = project_root.join(STORE_RELATIVE_PATH);
    LocalStore::open(&store_path)?;

    let out = InitOutput {
        config: ".roadpulse/config.toml".into(),
        store: STORE_RELATIVE_PATH.into(),
        schema_version: LATEST_SCHEMA_VERSION,
        reinitialized: existed,
    };
    render_mode(
        output,
        &out,
        |o, w| {
            writeln!(
                w,
                "initialized config={} store={} schema={}",
                o.config, o.store, o.schema_version
            )
        },
        |o, w| {
            pretty_section(w, "Initialized .roadpulse/")?;
            pretty_kv(w, "Config", &o.config)?;
            pretty_kv(w, "Store", format!("{} (schema v{})", o.store, o.schema_version))?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  Add a traffic sample:")?;
            writeln!(w, "    rp sample traffic --lat 10.99 --lng 76.01 --level 85")?;
            writeln!(w, "  Look at the map as user u1:")?;
            writeln!(w, "    rp --actor u1 map")
        },
    )
}
