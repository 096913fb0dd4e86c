/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::sign::SigningSettings;

/// Name of the intermediate archive in the output directory.
pub const INTERMEDIATE_NAME: &str = "flashable.zip";

pub const DEFAULT_OUTPUT_NAME: &str = "flashable-prerooted";

pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 4096;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Output name must be a plain file name: {0:?}")]
    InvalidOutputName(String),
}

type Result<T> = std::result::Result<T, Error>;

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_name() -> String {
    DEFAULT_OUTPUT_NAME.to_owned()
}

fn default_scratch_dir() -> PathBuf {
    env::temp_dir()
}

fn default_min_free_space_mb() -> u64 {
    DEFAULT_MIN_FREE_SPACE_MB
}

/// Read-only settings for a single pipeline run.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Config {
    /// Source FTF firmware archive.
    #[serde(default)]
    pub firmware: PathBuf,
    /// Extra firmware files to include, by checklist name (eg. `kernel`).
    #[serde(default)]
    pub include: Vec<String>,
    /// Additional flashable zips to bundle under `extra/`.
    #[serde(default)]
    pub extra_flashables: Vec<PathBuf>,
    /// Root access package.
    #[serde(default)]
    pub su: Option<PathBuf>,
    /// Recovery package. Skipped if the file does not exist.
    #[serde(default)]
    pub recovery: Option<PathBuf>,
    /// Whether to sign the final archive.
    #[serde(default)]
    pub sign: bool,
    #[serde(default)]
    pub signing: SigningSettings,
    /// Custom `updater-script` template. The built-in template is used if
    /// unset.
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Base name of the final artifact, without the `.zip` extension.
    #[serde(default = "default_output_name")]
    pub output_name: String,
    /// Directory in which the per-run scratch directory is created.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_min_free_space_mb")]
    pub min_free_space_mb: u64,
    /// Leave the intermediate archive behind if the run fails or is
    /// cancelled.
    #[serde(default)]
    pub keep_partial_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            firmware: PathBuf::new(),
            include: vec![],
            extra_flashables: vec![],
            su: None,
            recovery: None,
            sign: false,
            signing: SigningSettings::default(),
            script: None,
            output_dir: default_output_dir(),
            output_name: default_output_name(),
            scratch_dir: default_scratch_dir(),
            min_free_space_mb: default_min_free_space_mb(),
            keep_partial_output: false,
        }
    }
}

impl Config {
    /// Check the fields that can't be expressed through serde defaults.
    pub fn validate(&self) -> Result<()> {
        if self.firmware.as_os_str().is_empty() {
            return Err(Error::MissingField("firmware"));
        }

        let mut components = Path::new(&self.output_name).components();
        let is_plain = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        );
        if !is_plain {
            return Err(Error::InvalidOutputName(self.output_name.clone()));
        }

        Ok(())
    }

    /// Name inserted into the installer script. This is the firmware file
    /// name without its extension.
    pub fn firmware_name(&self) -> String {
        self.firmware
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn intermediate_path(&self) -> PathBuf {
        self.output_dir.join(INTERMEDIATE_NAME)
    }

    pub fn final_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.zip", self.output_name))
    }

    pub fn signed_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}-signed.zip", self.output_name))
    }

    pub fn has_recovery(&self) -> bool {
        self.recovery.as_deref().is_some_and(Path::exists)
    }
}

/// Parse a config from TOML text. Missing fields take their default values.
pub fn parse_config(path: &Path, data: &str) -> Result<Config> {
    toml_edit::de::from_str(data).map_err(|e| Error::Parse(path.to_owned(), e))
}

/// Load a config from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    parse_config(path, &data)
}
