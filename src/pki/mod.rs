//! Client certificate issuance
//!
//! The [`IssuancePipeline`] turns an [`Identity`] into a private key and a
//! CA-signed certificate whose Common Name is exactly that identity.
//!
//! # Pipeline
//!
//! 1. Check the CA certificate and key are readable
//! 2. Generate a private key
//! 3. Build a CSR with subject `/CN=<identity>`
//! 4. Sign the CSR with the CA, stamping a freshly allocated serial
//! 5. Check the returned certificate matches what was asked for
//!
//! Key and CSR material live in a per-request scratch directory with a
//! random name. The directory is removed when the request finishes, whether
//! it succeeded or not. Any failing stage fails the whole request: a caller
//! either gets a complete, consistent credential or an error.

pub mod backend;
pub mod native;
pub mod openssl;
pub mod serial;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;
use tracing::{debug, info, warn};
use x509_parser::prelude::*;

use crate::Identity;

pub use backend::{CaPaths, KeyAlgorithm, SignRequest, SigningBackend};
pub use native::NativeBackend;
pub use openssl::OpensslBackend;
pub use serial::{Serial, SerialAllocator};

/// Default certificate validity in days
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// File name of the private key inside the scratch directory
const KEY_FILE: &str = "client.key";

/// File name of the CSR inside the scratch directory
const CSR_FILE: &str = "client.csr";

/// Prefix of per-request scratch directories
const SCRATCH_PREFIX: &str = "kubeaccess-";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// CSR could not be built or parsed
    #[error("invalid CSR: {0}")]
    InvalidCsr(String),

    /// The CA refused or failed to sign
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// CA certificate or key missing/unreadable
    #[error("CA material unreadable at {}: {message}", path.display())]
    CaMaterial {
        /// The offending path
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// The signing toolchain is not available
    #[error("signing backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A pipeline stage exceeded its bound
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        /// Stage that timed out
        stage: &'static str,
        /// The bound that elapsed
        after: Duration,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

impl PkiError {
    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            PkiError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PkiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &[u8]) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data)
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Facts read back from an issued certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject common name
    pub common_name: String,
    /// Serial number, big-endian bytes as encoded
    pub serial: Vec<u8>,
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
}

impl CertificateInfo {
    /// Parse certificate info from a PEM-encoded certificate
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            common_name,
            serial: cert.raw_serial().to_vec(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
        })
    }
}

/// A private key and the certificate issued for it
#[derive(Clone)]
pub struct IssuedCredential {
    /// Who the certificate was issued for
    pub identity: Identity,
    /// PEM certificate signed by the cluster CA
    pub certificate_pem: Vec<u8>,
    /// PEM private key; never persisted
    pub private_key_pem: Vec<u8>,
    /// Serial stamped on the certificate
    pub serial: Serial,
    /// Expiry (Unix timestamp)
    pub not_after: i64,
}

impl IssuedCredential {
    /// Base64-encode certificate and key for embedding in a kubeconfig
    pub fn encode(&self) -> EncodedCredential {
        EncodedCredential {
            client_certificate_data: STANDARD.encode(&self.certificate_pem),
            client_key_data: STANDARD.encode(&self.private_key_pem),
        }
    }
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("identity", &self.identity)
            .field("serial", &self.serial)
            .field("not_after", &self.not_after)
            .field("private_key_pem", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Base64 certificate and key, ready for a kubeconfig user entry
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedCredential {
    /// Base64 PEM certificate
    pub client_certificate_data: String,
    /// Base64 PEM private key
    pub client_key_data: String,
}

impl fmt::Debug for EncodedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedCredential")
            .field("client_certificate_data", &self.client_certificate_data)
            .field("client_key_data", &"<redacted>")
            .finish()
    }
}

/// Issuance settings fixed at startup
#[derive(Debug, Clone)]
pub struct IssuancePolicy {
    /// Private key algorithm
    pub key_algorithm: KeyAlgorithm,
    /// Certificate validity in days
    pub validity_days: u32,
    /// Cluster CA material
    pub ca: CaPaths,
    /// Directory under which per-request scratch directories are created
    pub scratch_dir: PathBuf,
    /// Bound on each backend call
    pub stage_timeout: Duration,
}

/// Drives a [`SigningBackend`] through one issuance per call
pub struct IssuancePipeline {
    backend: Arc<dyn SigningBackend>,
    serials: SerialAllocator,
    policy: IssuancePolicy,
}

impl IssuancePipeline {
    /// Create a pipeline over the given backend
    pub fn new(backend: Arc<dyn SigningBackend>, policy: IssuancePolicy) -> Self {
        Self {
            backend,
            serials: SerialAllocator::new(),
            policy,
        }
    }

    /// The policy this pipeline issues under
    pub fn policy(&self) -> &IssuancePolicy {
        &self.policy
    }

    /// Issue a key and certificate for `identity`
    pub async fn issue(&self, identity: &Identity) -> Result<IssuedCredential> {
        check_ca_material(&self.policy.ca).await?;

        // tempfile is synchronous; keep its directory create/remove off the runtime threads
        let scratch_root = self.policy.scratch_dir.clone();
        let scratch = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(SCRATCH_PREFIX)
                .tempdir_in(scratch_root)
        })
        .await
        .map_err(|e| PkiError::Io(std::io::Error::other(e)))??;

        let outcome = self.issue_in(scratch.path(), identity).await;

        let scratch_path = scratch.path().to_path_buf();
        match tokio::task::spawn_blocking(move || scratch.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %scratch_path.display(), error = %e, "failed to remove scratch directory")
            }
            Err(e) => {
                warn!(path = %scratch_path.display(), error = %e, "scratch cleanup task failed")
            }
        }

        match &outcome {
            Ok(credential) => info!(
                identity = %identity,
                serial = %credential.serial,
                not_after = credential.not_after,
                "issued client certificate"
            ),
            Err(e) => warn!(identity = %identity, error = %e, "certificate issuance failed"),
        }

        outcome
    }

    async fn issue_in(&self, dir: &Path, identity: &Identity) -> Result<IssuedCredential> {
        let private_key_pem = self
            .stage(
                "key generation",
                self.backend.generate_key(self.policy.key_algorithm),
            )
            .await?;
        let key_path = dir.join(KEY_FILE);
        tokio::fs::write(&key_path, &private_key_pem).await?;
        debug!(identity = %identity, algorithm = %self.policy.key_algorithm, "generated private key");

        let csr_pem = self
            .stage(
                "CSR construction",
                self.backend.create_csr(&key_path, identity.as_str()),
            )
            .await?;
        let csr_path = dir.join(CSR_FILE);
        tokio::fs::write(&csr_path, &csr_pem).await?;

        let serial = self.serials.next_serial();
        let request = SignRequest {
            csr_path,
            ca: self.policy.ca.clone(),
            validity_days: self.policy.validity_days,
            serial,
        };
        let certificate_pem = self
            .stage("CA signing", self.backend.sign_csr(&request))
            .await?;

        let info = CertificateInfo::from_pem(&certificate_pem)?;
        if info.common_name != identity.as_str() {
            return Err(PkiError::SigningFailed(format!(
                "certificate common name {:?} does not match requested identity {:?}",
                info.common_name,
                identity.as_str()
            )));
        }
        if info.serial != serial.as_bytes() {
            return Err(PkiError::SigningFailed(format!(
                "certificate serial does not match allocated serial {serial}"
            )));
        }

        Ok(IssuedCredential {
            identity: identity.clone(),
            certificate_pem,
            private_key_pem,
            serial,
            not_after: info.not_after,
        })
    }

    async fn stage<T>(
        &self,
        stage: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let after = self.policy.stage_timeout;
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| PkiError::Timeout { stage, after })?
    }
}

/// Fail fast when the CA certificate or key cannot be read
async fn check_ca_material(ca: &CaPaths) -> Result<()> {
    for path in [&ca.cert, &ca.key] {
        tokio::fs::File::open(path)
            .await
            .map_err(|e| PkiError::CaMaterial {
                path: path.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}

/// Read a CA file, mapping failures to [`PkiError::CaMaterial`]
pub(crate) async fn read_ca_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PkiError::CaMaterial {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
        KeyUsagePurpose,
    };

    use super::CaPaths;

    /// Write a throwaway self-signed CA into `dir`
    pub(crate) fn write_test_ca(dir: &Path) -> CaPaths {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String("kubeaccess test CA".to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let paths = CaPaths {
            cert: dir.join("ca.crt"),
            key: dir.join("ca.key"),
        };
        std::fs::write(&paths.cert, cert.pem()).unwrap();
        std::fs::write(&paths.key, key_pair.serialize_pem()).unwrap();
        paths
    }
}
