//! In-process signing backend built on rcgen
//!
//! Needs no external toolchain. Keys are ECDSA P-256; RSA generation is not
//! offered here (use the openssl backend for the RSA reference policy). The
//! CA key must be PKCS#8 PEM.

use std::path::Path;

use async_trait::async_trait;
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use x509_parser::prelude::*;

use super::backend::{KeyAlgorithm, SignRequest, SigningBackend};
use super::{parse_pem, read_ca_file, PkiError, Result};

/// Signing backend that does everything in-process
#[derive(Debug, Clone, Default)]
pub struct NativeBackend;

impl NativeBackend {
    /// Create a new backend
    pub fn new() -> Self {
        Self
    }
}

fn subject(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn
}

/// Extract the subject CN from a PEM CSR
fn csr_common_name(csr_pem: &str) -> Result<String> {
    let der = parse_pem(csr_pem.as_bytes())
        .map_err(|e| PkiError::InvalidCsr(format!("failed to decode CSR: {}", e)))?;
    let (_, csr) = X509CertificationRequest::from_der(&der)
        .map_err(|e| PkiError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;

    let common_name = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .ok_or_else(|| PkiError::InvalidCsr("CSR subject has no common name".into()));
    common_name
}

#[async_trait]
impl SigningBackend for NativeBackend {
    async fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Vec<u8>> {
        match algorithm {
            KeyAlgorithm::EcdsaP256 => {
                let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                    .map_err(|e| {
                        PkiError::KeyGenerationFailed(format!("failed to generate key: {}", e))
                    })?;
                Ok(key_pair.serialize_pem().into_bytes())
            }
            KeyAlgorithm::Rsa { bits } => Err(PkiError::KeyGenerationFailed(format!(
                "native backend cannot generate {bits}-bit RSA keys; use the openssl signer or ecdsa-p256"
            ))),
        }
    }

    async fn create_csr(&self, key_path: &Path, common_name: &str) -> Result<Vec<u8>> {
        let key_pem = tokio::fs::read_to_string(key_path).await?;
        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| PkiError::InvalidCsr(format!("failed to load private key: {}", e)))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject(common_name);

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| PkiError::InvalidCsr(format!("failed to create CSR: {}", e)))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| PkiError::InvalidCsr(format!("failed to serialize CSR: {}", e)))?;

        Ok(csr_pem.into_bytes())
    }

    async fn sign_csr(&self, request: &SignRequest) -> Result<Vec<u8>> {
        let ca_cert_pem = read_ca_file(&request.ca.cert).await?;
        let ca_key_pem = read_ca_file(&request.ca.key).await?;
        let csr_pem = tokio::fs::read_to_string(&request.csr_path).await?;

        let common_name = csr_common_name(&csr_pem)?;
        let mut csr_params = CertificateSigningRequestParams::from_pem(&csr_pem)
            .map_err(|e| PkiError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;

        // Only the CN is carried over from the request
        csr_params.params.distinguished_name = subject(&common_name);
        csr_params.params.subject_alt_names = Vec::new();
        csr_params.params.is_ca = IsCa::NoCa;
        csr_params.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr_params.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let now = ::time::OffsetDateTime::now_utc();
        csr_params.params.not_before = now;
        csr_params.params.not_after = now + ::time::Duration::days(request.validity_days.into());
        csr_params.params.serial_number = Some(SerialNumber::from_slice(request.serial.as_bytes()));

        let ca_key = KeyPair::from_pem(&ca_key_pem).map_err(|e| PkiError::CaMaterial {
            path: request.ca.key.clone(),
            message: format!("failed to parse CA key: {}", e),
        })?;
        let issuer =
            Issuer::from_ca_cert_pem(&ca_cert_pem, &ca_key).map_err(|e| PkiError::CaMaterial {
                path: request.ca.cert.clone(),
                message: format!("failed to load CA certificate: {}", e),
            })?;

        let signed_cert = csr_params.signed_by(&issuer).map_err(|e| {
            PkiError::SigningFailed(format!("failed to sign certificate: {}", e))
        })?;

        Ok(signed_cert.pem().into_bytes())
    }
}
