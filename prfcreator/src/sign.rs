// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Signing of the flashable archive with AOSP's `signapk.jar`.

use std::{
    ffi::OsStr,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    crypto::{self, PassphraseSource},
    util::DebugString,
};

/// AOSP test key. Anything signed with it is accepted by recoveries that don't
/// enforce signature verification.
static TEST_KEY_PK8: &[u8] = include_bytes!("../keys/testkey.pk8");
static TEST_CERT_PEM: &[u8] = include_bytes!("../keys/testkey.x509.pem");

#[derive(Debug, Error)]
pub enum Error {
    #[error("Signing tool is not usable: {0:?}")]
    ToolUnavailable(DebugString, #[source] io::Error),
    #[error("Signing key and certificate must be specified together")]
    KeyPairIncomplete,
    #[error("Failed to load signing key material")]
    KeyMaterial(#[source] crypto::Error),
    #[error("Failed to write signing key material to: {0:?}")]
    KeyMaterialWrite(PathBuf, #[source] io::Error),
    #[error("Certificate {cert:?} does not match private key {key:?}")]
    KeyMismatch { key: PathBuf, cert: PathBuf },
    #[error("Failed to run command: {0:?}")]
    CommandSpawn(DebugString, #[source] io::Error),
    #[error("Signing command failed with status: {1}: {0:?}")]
    SignFailure(DebugString, ExitStatus),
    #[error("Failed to remove unsigned archive: {0:?}")]
    RemoveInput(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

fn default_java() -> PathBuf {
    PathBuf::from("java")
}

fn default_jar() -> PathBuf {
    PathBuf::from("signapk.jar")
}

/// Settings for invoking the signing tool.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct SigningSettings {
    /// Java executable. Looked up in `PATH` if it is a bare name.
    pub java: PathBuf,
    /// Path to `signapk.jar`.
    pub jar: PathBuf,
    /// PKCS8 PEM private key. The embedded test key is used if unset.
    pub key: Option<PathBuf>,
    /// X509 PEM certificate matching [`Self::key`].
    pub cert: Option<PathBuf>,
    /// File containing the passphrase for an encrypted [`Self::key`].
    pub pass_file: Option<PathBuf>,
    /// Environment variable containing the passphrase for [`Self::key`].
    pub pass_env_var: Option<String>,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            java: default_java(),
            jar: default_jar(),
            key: None,
            cert: None,
            pass_file: None,
            pass_env_var: None,
        }
    }
}

impl SigningSettings {
    fn passphrase_source(&self) -> Option<PassphraseSource> {
        PassphraseSource::new(
            self.pass_file.as_deref(),
            self.pass_env_var.as_deref().map(OsStr::new),
        )
    }
}

/// Key pair written to scratch files for the duration of a signing call. The
/// files are deleted when this is dropped.
#[derive(Debug)]
pub struct KeyMaterial {
    key: NamedTempFile,
    cert: NamedTempFile,
}

impl KeyMaterial {
    fn write_temp(scratch: &Path, suffix: &str, data: &[u8]) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("signapk")
            .suffix(suffix)
            .tempfile_in(scratch)
            .map_err(|e| Error::KeyMaterialWrite(scratch.to_owned(), e))?;

        file.write_all(data)
            .and_then(|()| file.flush())
            .map_err(|e| Error::KeyMaterialWrite(file.path().to_owned(), e))?;

        Ok(file)
    }

    /// Load the configured key pair, or the embedded test key pair if none is
    /// configured, and write them in the form signapk expects.
    pub fn new(settings: &SigningSettings, scratch: &Path) -> Result<Self> {
        let (key_der, cert_data) = match (&settings.key, &settings.cert) {
            (None, None) => (TEST_KEY_PK8.to_vec(), TEST_CERT_PEM.to_vec()),
            (Some(key_path), Some(cert_path)) => {
                let passphrase = settings.passphrase_source();
                let key = crypto::read_pem_key_file(key_path, passphrase.as_ref())
                    .map_err(Error::KeyMaterial)?;
                let cert = crypto::read_pem_cert_file(cert_path).map_err(Error::KeyMaterial)?;

                if !crypto::cert_matches_key(&cert, &key).map_err(Error::KeyMaterial)? {
                    return Err(Error::KeyMismatch {
                        key: key_path.clone(),
                        cert: cert_path.clone(),
                    });
                }

                let key_der = crypto::key_to_der(&key).map_err(Error::KeyMaterial)?;
                let cert_der = crypto::cert_to_der(&cert).map_err(Error::KeyMaterial)?;

                (key_der.as_bytes().to_vec(), cert_der)
            }
            _ => return Err(Error::KeyPairIncomplete),
        };

        let key = Self::write_temp(scratch, ".pk8", &key_der)?;
        let cert = Self::write_temp(scratch, ".x509", &cert_data)?;

        Ok(Self { key, cert })
    }

    pub fn key_path(&self) -> &Path {
        self.key.path()
    }

    pub fn cert_path(&self) -> &Path {
        self.cert.path()
    }
}

/// Ensure that the java runtime can be executed.
pub fn check_java(java: &Path) -> Result<()> {
    let mut command = Command::new(java);
    command.arg("-version");
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::piped());

    let output = command
        .output()
        .map_err(|e| Error::ToolUnavailable(DebugString::new(&command), e))?;

    if !output.status.success() {
        return Err(Error::ToolUnavailable(
            DebugString::new(&command),
            io::Error::other(format!("Exited with status: {}", output.status)),
        ));
    }

    debug!(
        "Java runtime: {}",
        String::from_utf8_lossy(&output.stderr).trim(),
    );

    Ok(())
}

/// Ensure that `signapk.jar` exists.
pub fn check_jar(jar: &Path) -> Result<()> {
    if jar.is_file() {
        Ok(())
    } else {
        Err(Error::ToolUnavailable(
            DebugString::new(jar),
            io::Error::new(io::ErrorKind::NotFound, "Jar file not found"),
        ))
    }
}

/// Sign `input` into `output` with signapk's whole-file mode. The key material
/// is written to `scratch` and removed before returning. On success, `input` is
/// deleted. On failure, `input` is left intact and any partial `output` is
/// removed.
pub fn sign(
    settings: &SigningSettings,
    input: &Path,
    output: &Path,
    scratch: &Path,
) -> Result<PathBuf> {
    check_java(&settings.java)?;

    check_jar(&settings.jar)?;

    let material = KeyMaterial::new(settings, scratch)?;

    let mut command = Command::new(&settings.java);
    command.arg("-Xmx1024m");
    command.arg("-jar");
    command.arg(&settings.jar);
    command.arg("-w");
    command.arg(material.cert_path());
    command.arg(material.key_path());
    command.arg(input);
    command.arg(output);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    info!("Signing {input:?} to {output:?}");

    let result = command.output();
    drop(material);

    let child = match result {
        Ok(c) => c,
        Err(e) => {
            let _ = fs::remove_file(output);
            return Err(Error::CommandSpawn(DebugString::new(&command), e));
        }
    };

    if !child.status.success() {
        debug!("signapk stderr: {}", String::from_utf8_lossy(&child.stderr));
        let _ = fs::remove_file(output);
        return Err(Error::SignFailure(DebugString::new(&command), child.status));
    }

    fs::remove_file(input).map_err(|e| Error::RemoveInput(input.to_owned(), e))?;

    Ok(output.to_owned())
}
