// SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    env::{self, VarError},
    ffi::{OsStr, OsString},
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use pkcs8::{DecodePrivateKey, EncodePrivateKey, SecretDocument};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use x509_cert::{
    Certificate,
    der::{DecodePem, Encode, referenced::OwnedToRef},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Private key is encrypted, but no passphrase source was given: {0:?}")]
    PassphraseRequired(PathBuf),
    #[error("Failed to read environment variable: {0:?}")]
    InvalidEnvVar(OsString, #[source] VarError),
    #[error("PEM has start tag, but no end tag")]
    PemNoEndTag,
    #[error("Failed to load encrypted RSA private key")]
    LoadKeyEncrypted(#[source] pkcs8::Error),
    #[error("Failed to load unencrypted RSA private key")]
    LoadKeyUnencrypted(#[source] pkcs8::Error),
    #[error("Failed to encode RSA private key as DER")]
    SaveKeyDer(#[source] pkcs8::Error),
    #[error("Failed to load RSA public key")]
    LoadPubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to load X509 certificate")]
    LoadCert(#[source] x509_cert::der::Error),
    #[error("Failed to encode X509 certificate as DER")]
    SaveCertDer(#[source] x509_cert::der::Error),
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Where to get the passphrase for an encrypted private key. There is no
/// interactive prompt because signing runs on a background worker.
#[derive(Clone, Debug)]
pub enum PassphraseSource {
    EnvVar(OsString),
    File(PathBuf),
}

impl PassphraseSource {
    pub fn new(pass_file: Option<&Path>, env_var: Option<&OsStr>) -> Option<Self> {
        if let Some(v) = env_var {
            Some(Self::EnvVar(v.to_owned()))
        } else {
            pass_file.map(|p| Self::File(p.to_owned()))
        }
    }

    pub fn acquire(&self) -> Result<String> {
        let passphrase = match self {
            Self::EnvVar(v) => env::var(v).map_err(|e| Error::InvalidEnvVar(v.clone(), e))?,
            Self::File(p) => fs::read_to_string(p)
                .map_err(|e| Error::ReadFile(p.clone(), e))?
                .trim_end_matches(['\r', '\n'])
                .to_owned(),
        };

        Ok(passphrase)
    }
}

/// x509_cert/pem follow rfc7468 strictly instead of implementing a lenient
/// parser. The PEM decoder rejects lines in the base64 section that are longer
/// than 64 characters, excluding whitespace. Certificates produced by older
/// Android tooling do not always follow this, so the data is reformatted.
fn reformat_pem(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = vec![];
    let mut base64 = vec![];
    let mut inside_base64 = false;

    for mut line in data.split(|&c| c == b'\n') {
        while let [rest @ .., last] = line {
            if !last.is_ascii_whitespace() {
                break;
            }
            line = rest;
        }

        if line.is_empty() {
            continue;
        } else if line.starts_with(b"-----BEGIN CERTIFICATE-----") {
            inside_base64 = true;

            result.extend_from_slice(line);
            result.push(b'\n');
        } else if line.starts_with(b"-----END CERTIFICATE-----") {
            inside_base64 = false;

            for chunk in base64.chunks(64) {
                result.extend_from_slice(chunk);
                result.push(b'\n');
            }

            base64.clear();

            result.extend_from_slice(line);
            result.push(b'\n');
        } else if inside_base64 {
            base64.extend_from_slice(line);
        }
    }

    if inside_base64 {
        return Err(Error::PemNoEndTag);
    }

    Ok(result)
}

/// Read PEM-encoded certificate from a reader.
pub fn read_pem_cert(path: &Path, mut reader: impl Read) -> Result<Certificate> {
    let mut data = vec![];
    reader
        .read_to_end(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    let data = reformat_pem(&data)?;
    let certificate = Certificate::from_pem(data).map_err(Error::LoadCert)?;

    Ok(certificate)
}

/// Read PEM-encoded certificate from a file.
pub fn read_pem_cert_file(path: &Path) -> Result<Certificate> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_cert(path, reader)
}

/// Read PEM-encoded PKCS8 private key from a reader. A passphrase is only
/// acquired from `source` if the key is encrypted.
pub fn read_pem_key(
    path: &Path,
    mut reader: impl Read,
    source: Option<&PassphraseSource>,
) -> Result<RsaPrivateKey> {
    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    if data.contains("ENCRYPTED") {
        let source = source.ok_or_else(|| Error::PassphraseRequired(path.to_owned()))?;
        let passphrase = source.acquire()?;

        RsaPrivateKey::from_pkcs8_encrypted_pem(&data, passphrase).map_err(Error::LoadKeyEncrypted)
    } else {
        RsaPrivateKey::from_pkcs8_pem(&data).map_err(Error::LoadKeyUnencrypted)
    }
}

/// Read PEM-encoded PKCS8 private key from a file.
pub fn read_pem_key_file(path: &Path, source: Option<&PassphraseSource>) -> Result<RsaPrivateKey> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_key(path, reader, source)
}

/// Parse a DER-encoded unencrypted PKCS8 private key.
pub fn read_der_key(data: &[u8]) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(data).map_err(Error::LoadKeyUnencrypted)
}

/// Encode a private key in the unencrypted DER form that signapk expects.
pub fn key_to_der(key: &RsaPrivateKey) -> Result<SecretDocument> {
    key.to_pkcs8_der().map_err(Error::SaveKeyDer)
}

/// Encode a certificate in DER form.
pub fn cert_to_der(cert: &Certificate) -> Result<Vec<u8>> {
    cert.to_der().map_err(Error::SaveCertDer)
}

/// Get the RSA public key from a certificate.
pub fn get_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let public_key =
        RsaPublicKey::try_from(cert.tbs_certificate.subject_public_key_info.owned_to_ref())
            .map_err(Error::LoadPubKey)?;

    Ok(public_key)
}

/// Check if a certificate matches a private key.
pub fn cert_matches_key(cert: &Certificate, key: &RsaPrivateKey) -> Result<bool> {
    let public_key = get_public_key(cert)?;

    Ok(key.to_public_key() == public_key)
}
