// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::{
    cli::{status, warning},
    config::{self, Config},
    pipeline::{self, Event, Outcome},
};

/// Build the effective config from the optional config file and the
/// command-line overrides.
pub fn build_config(cli: &CreateCli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config: {path:?}"))?,
        None => Config::default(),
    };

    if let Some(path) = &cli.firmware {
        config.firmware.clone_from(path);
    }
    if !cli.include.is_empty() {
        config.include.clone_from(&cli.include);
    }
    if !cli.extra_flashables.is_empty() {
        config.extra_flashables.clone_from(&cli.extra_flashables);
    }
    if cli.su.is_some() {
        config.su.clone_from(&cli.su);
    }
    if cli.recovery.is_some() {
        config.recovery.clone_from(&cli.recovery);
    }
    if cli.sign {
        config.sign = true;
    }
    if let Some(path) = &cli.signapk {
        config.signing.jar.clone_from(path);
    }
    if let Some(path) = &cli.java {
        config.signing.java.clone_from(path);
    }
    if cli.key.is_some() {
        config.signing.key.clone_from(&cli.key);
        config.signing.cert.clone_from(&cli.cert);
    }
    if cli.pass_env_var.is_some() {
        config.signing.pass_env_var.clone_from(&cli.pass_env_var);
        config.signing.pass_file = None;
    } else if cli.pass_file.is_some() {
        config.signing.pass_file.clone_from(&cli.pass_file);
        config.signing.pass_env_var = None;
    }
    if cli.script.is_some() {
        config.script.clone_from(&cli.script);
    }
    if let Some(path) = &cli.output_dir {
        config.output_dir.clone_from(path);
    }
    if let Some(name) = &cli.output_name {
        config.output_name.clone_from(name);
    }
    if let Some(path) = &cli.scratch_dir {
        config.scratch_dir.clone_from(path);
    }
    if let Some(mb) = cli.min_free_space {
        config.min_free_space_mb = mb;
    }
    if cli.keep_partial_output {
        config.keep_partial_output = true;
    }

    config.validate().context("Invalid configuration")?;

    Ok(config)
}

pub fn create_main(cli: &CreateCli, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let config = build_config(cli)?;

    let handle =
        pipeline::spawn(config, cancel_signal.clone()).context("Failed to start worker thread")?;

    // Log lines are already emitted through tracing.
    for event in handle.events() {
        match event {
            Event::Progress {
                index,
                total,
                step,
                percent,
            } => status!("[{index}/{total}] {step} ({percent}%)"),
            Event::Warning(message) => warning!("{message}"),
            Event::Log(_) | Event::Finished(_) => {}
        }
    }

    match handle.join() {
        Outcome::Completed { artifact } => {
            status!("Created: {artifact:?}");
            Ok(())
        }
        Outcome::Cancelled => bail!("Cancelled"),
        Outcome::Failed(message) => bail!("{message}"),
    }
}

/// Create a flashable pre-rooted package from a firmware archive.
///
/// Options given on the command line take precedence over the config file.
#[derive(Debug, Parser)]
pub struct CreateCli {
    /// Path to TOML config file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub config: Option<PathBuf>,

    /// Path to FTF firmware archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub firmware: Option<PathBuf>,

    /// Extra firmware file to include.
    ///
    /// One of: kernel, fotakernel, ltalabel, modem, baseband.
    #[arg(long, value_name = "NAME")]
    pub include: Vec<String>,

    /// Additional flashable zip to bundle.
    #[arg(long = "extra-flashable", value_name = "FILE", value_parser)]
    pub extra_flashables: Vec<PathBuf>,

    /// Root access package (eg. SuperSU zip).
    #[arg(long, value_name = "FILE", value_parser)]
    pub su: Option<PathBuf>,

    /// Recovery package.
    #[arg(long, value_name = "FILE", value_parser)]
    pub recovery: Option<PathBuf>,

    /// Sign the output with signapk.
    #[arg(long)]
    pub sign: bool,

    /// Path to signapk.jar.
    #[arg(long, value_name = "FILE", value_parser)]
    pub signapk: Option<PathBuf>,

    /// Java executable.
    #[arg(long, value_name = "PROGRAM", value_parser)]
    pub java: Option<PathBuf>,

    /// Private key for signing (PKCS8 PEM).
    ///
    /// The AOSP test key is used if unspecified.
    #[arg(long, value_name = "FILE", value_parser, requires = "cert")]
    pub key: Option<PathBuf>,

    /// Certificate for signing (X509 PEM).
    #[arg(long, value_name = "FILE", value_parser, requires = "key")]
    pub cert: Option<PathBuf>,

    /// Environment variable containing the private key passphrase.
    #[arg(long, value_name = "ENV_VAR", conflicts_with = "pass_file")]
    pub pass_env_var: Option<String>,

    /// Text file containing the private key passphrase.
    #[arg(long, value_name = "FILE", value_parser)]
    pub pass_file: Option<PathBuf>,

    /// Custom updater-script template.
    #[arg(long, value_name = "FILE", value_parser)]
    pub script: Option<PathBuf>,

    /// Directory to write the output to.
    #[arg(short, long, value_name = "DIR", value_parser)]
    pub output_dir: Option<PathBuf>,

    /// Output file name, without the .zip extension.
    #[arg(long, value_name = "NAME")]
    pub output_name: Option<String>,

    /// Directory for temporary files.
    #[arg(long, value_name = "DIR", value_parser)]
    pub scratch_dir: Option<PathBuf>,

    /// Minimum free space in the scratch directory (MiB).
    #[arg(long, value_name = "MB")]
    pub min_free_space: Option<u64>,

    /// Keep the intermediate archive if the run fails or is cancelled.
    #[arg(long)]
    pub keep_partial_output: bool,
}
