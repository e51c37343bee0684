//! Signing backend that shells out to the `openssl` binary
//!
//! This is the reference toolchain: `genrsa`, `req -new` and `x509 -req`.
//! Child processes are killed if the request future is dropped (timeout or
//! client disconnect).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::backend::{KeyAlgorithm, SignRequest, SigningBackend};
use super::{PkiError, Result};

/// Digest used for CSRs and certificates
const DIGEST: &str = "-sha256";

/// Signing backend driving an `openssl` executable
#[derive(Debug, Clone)]
pub struct OpensslBackend {
    binary: PathBuf,
}

impl OpensslBackend {
    /// Use the given `openssl` executable (a bare name is looked up on `PATH`)
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: Vec<OsString>, on_failure: fn(String) -> PkiError) -> Result<Vec<u8>> {
        let subcommand = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(binary = %self.binary.display(), subcommand = %subcommand, "running openssl");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PkiError::BackendUnavailable(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(on_failure(format!(
                "openssl {} exited with {}: {}",
                subcommand,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(on_failure(format!("openssl {} produced no output", subcommand)));
        }

        Ok(output.stdout)
    }
}

impl Default for OpensslBackend {
    fn default() -> Self {
        Self::new("openssl")
    }
}

/// Arguments for private key generation (PEM on stdout)
fn key_args(algorithm: KeyAlgorithm) -> Vec<OsString> {
    match algorithm {
        KeyAlgorithm::Rsa { bits } => vec!["genrsa".into(), bits.to_string().into()],
        KeyAlgorithm::EcdsaP256 => vec![
            "ecparam".into(),
            "-name".into(),
            "prime256v1".into(),
            "-genkey".into(),
            "-noout".into(),
        ],
    }
}

/// Arguments for CSR construction with subject `/CN=<common_name>`
fn csr_args(key_path: &Path, common_name: &str) -> Vec<OsString> {
    vec![
        "req".into(),
        "-new".into(),
        "-utf8".into(),
        DIGEST.into(),
        "-key".into(),
        key_path.into(),
        "-subj".into(),
        format!("/CN={}", common_name).into(),
    ]
}

/// Arguments for CA signing
fn sign_args(request: &SignRequest) -> Vec<OsString> {
    vec![
        "x509".into(),
        "-req".into(),
        "-days".into(),
        request.validity_days.to_string().into(),
        DIGEST.into(),
        "-in".into(),
        request.csr_path.clone().into(),
        "-CA".into(),
        request.ca.cert.clone().into(),
        "-CAkey".into(),
        request.ca.key.clone().into(),
        "-set_serial".into(),
        format!("0x{}", request.serial.to_hex()).into(),
    ]
}

#[async_trait]
impl SigningBackend for OpensslBackend {
    async fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Vec<u8>> {
        self.run(key_args(algorithm), PkiError::KeyGenerationFailed)
            .await
    }

    async fn create_csr(&self, key_path: &Path, common_name: &str) -> Result<Vec<u8>> {
        self.run(csr_args(key_path, common_name), PkiError::InvalidCsr)
            .await
    }

    async fn sign_csr(&self, request: &SignRequest) -> Result<Vec<u8>> {
        self.run(sign_args(request), PkiError::SigningFailed).await
    }
}
