use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::docx::rules::RuleSettings;
use crate::edit::SessionOptions;

pub const CONFIG_FILE_NAME: &str = "docx-mender.toml";
pub const CONFIG_ENV_VAR: &str = "DOCX_MENDER_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub edit: EditSection,
    #[serde(default)]
    pub validate: ValidateSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EditSection {
    /// Author recorded on comments and revisions (default: "docx-mender").
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub initials: Option<String>,
    /// Run the element-order corrector on commit (default: true).
    #[serde(default)]
    pub fix_order_on_commit: Option<bool>,
    /// Fixed `YYYY-MM-DDTHH:MM:SSZ` stamp for reproducible output.
    #[serde(default)]
    pub fixed_timestamp: Option<String>,
    #[serde(default)]
    pub id_seed: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ValidateSection {
    #[serde(default)]
    pub width_tolerance: Option<f64>,
    #[serde(default)]
    pub aspect_tolerance: Option<f64>,
    #[serde(default)]
    pub min_margin_twips: Option<i64>,
}

impl AppConfig {
    pub fn session_options(&self) -> SessionOptions {
        let mut opts = SessionOptions::default();
        if let Some(author) = non_empty(&self.edit.author) {
            opts.author = author;
        }
        opts.initials = non_empty(&self.edit.initials);
        if let Some(v) = self.edit.fix_order_on_commit {
            opts.fix_order_on_commit = v;
        }
        opts.fixed_timestamp = non_empty(&self.edit.fixed_timestamp);
        opts.id_seed = non_empty(&self.edit.id_seed);
        opts
    }

    pub fn rule_settings(&self) -> RuleSettings {
        let d = RuleSettings::default();
        RuleSettings {
            width_tolerance: self.validate.width_tolerance.unwrap_or(d.width_tolerance),
            aspect_tolerance: self.validate.aspect_tolerance.unwrap_or(d.aspect_tolerance),
            min_margin_twips: self.validate.min_margin_twips.unwrap_or(d.min_margin_twips),
        }
    }
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

/// Explicit path, then `DOCX_MENDER_CONFIG`, then the upward search.
pub fn locate_config(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .or_else(|| find_default_config(CONFIG_FILE_NAME))
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Load the located config, or defaults when none exists. An explicit path must exist.
pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<(AppConfig, Option<PathBuf>)> {
    if let Some(p) = explicit {
        if !p.is_file() {
            bail!("config not found: {}", p.display());
        }
    }
    match locate_config(explicit) {
        Some(p) if p.is_file() => Ok((load_config(&p)?, Some(p))),
        _ => Ok((AppConfig::default(), None)),
    }
}

pub const DEFAULT_CONFIG_TOML: &str = r#"[edit]
# Author recorded on comments and tracked changes.
author = "docx-mender"
# initials = "DM"

# Reorder elements of every modified part before writing the output.
fix_order_on_commit = true

# Reproducible output: fixed date stamp and identifier seed.
# fixed_timestamp = "2024-01-01T00:00:00Z"
# id_seed = "docx-mender"

[validate]
# Relative difference allowed between a cell width and its grid columns.
width_tolerance = 0.05
# Relative difference allowed between displayed and intrinsic image aspect ratio.
aspect_tolerance = 0.05
# Margins below this (twips) on all four sides are reported as zero margins.
min_margin_twips = 360
"#;

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        bail!(
            "config already exists: {} (use --force to overwrite)",
            cfg_path.display()
        );
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}
