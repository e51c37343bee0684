//! Signing backend contract
//!
//! The pipeline never does cryptography itself. It drives a
//! [`SigningBackend`], which generates keys, builds CSRs and signs them with
//! the cluster CA. Key and CSR material is handed over through files the
//! pipeline owns, so file-oriented backends (the `openssl` binary) and
//! in-process ones fit the same shape.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::serial::Serial;
use super::Result;

/// Private key algorithm for issued credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA with the given modulus size
    Rsa {
        /// Modulus size in bits
        bits: u32,
    },
    /// ECDSA on NIST P-256
    EcdsaP256,
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        KeyAlgorithm::Rsa { bits: 4096 }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa { bits } => write!(f, "rsa-{bits}"),
            KeyAlgorithm::EcdsaP256 => f.write_str("ecdsa-p256"),
        }
    }
}

/// Location of the cluster CA certificate and key on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaPaths {
    /// PEM CA certificate
    pub cert: PathBuf,
    /// PEM CA private key
    pub key: PathBuf,
}

/// Everything needed to turn a CSR into a certificate
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// PEM CSR written by the pipeline
    pub csr_path: PathBuf,
    /// CA material to sign with
    pub ca: CaPaths,
    /// Validity window in days, starting now
    pub validity_days: u32,
    /// Serial to stamp on the certificate
    pub serial: Serial,
}

/// X.509 signing capability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Generate a new private key, returned as PEM
    async fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Vec<u8>>;

    /// Build a PEM CSR whose subject is exactly `/CN=<common_name>`, signed
    /// with the key stored at `key_path`
    async fn create_csr(&self, key_path: &Path, common_name: &str) -> Result<Vec<u8>>;

    /// Sign the CSR with the CA, returning the PEM certificate
    async fn sign_csr(&self, request: &SignRequest) -> Result<Vec<u8>>;
}
