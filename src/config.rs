//! Command-line and environment configuration
//!
//! Every flag has a `KUBEACCESS_*` environment fallback. Defaults target a
//! local minikube cluster. CA files are not opened here; they are read per
//! request so that a missing CA fails requests, not startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::kubeconfig::ClusterEndpoint;
use crate::pki::{
    CaPaths, IssuancePolicy, KeyAlgorithm, NativeBackend, OpensslBackend, SigningBackend,
};
use crate::telemetry::LogFormat;

/// Smallest RSA modulus accepted for client keys
pub const MIN_RSA_BITS: u32 = 2048;

/// Configuration errors, reported before the server starts
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A flag value is out of range or inconsistent with another
    #[error("invalid value for {flag}: {message}")]
    Invalid {
        /// The offending flag
        flag: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// A default path could not be resolved
    #[error("cannot determine default for {flag}: no home directory; pass it explicitly")]
    NoHomeDirectory {
        /// The flag whose default needs `$HOME`
        flag: &'static str,
    },
}

fn invalid(flag: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        flag,
        message: message.into(),
    }
}

/// kubeaccess - provision Kubernetes RBAC grants and client-certificate kubeconfigs
#[derive(Parser, Debug)]
#[command(name = "kubeaccess", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API
    Serve(ServeArgs),
}

/// Which signing toolchain issues certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Signer {
    /// Shell out to the `openssl` binary
    #[default]
    Openssl,
    /// Sign in-process (ECDSA keys only)
    Native,
}

/// Client key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KeyType {
    /// RSA, size set by `--rsa-bits`
    #[default]
    Rsa,
    /// ECDSA on P-256
    EcdsaP256,
}

/// Arguments for `kubeaccess serve`
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "KUBEACCESS_LISTEN", default_value = "0.0.0.0:4000")]
    pub listen: SocketAddr,

    /// Cluster name written into issued kubeconfigs
    #[arg(long, env = "KUBEACCESS_CLUSTER_NAME", default_value = "minikube")]
    pub cluster_name: String,

    /// API server URL written into issued kubeconfigs
    #[arg(
        long,
        env = "KUBEACCESS_CLUSTER_SERVER",
        default_value = "https://192.168.99.100:8443"
    )]
    pub cluster_server: String,

    /// CA certificate path [default: $HOME/.minikube/ca.crt]
    #[arg(long, env = "KUBEACCESS_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// CA private key path [default: $HOME/.minikube/ca.key]
    #[arg(long, env = "KUBEACCESS_CA_KEY")]
    pub ca_key: Option<PathBuf>,

    /// Signing backend
    #[arg(long, env = "KUBEACCESS_SIGNER", value_enum, default_value_t = Signer::Openssl)]
    pub signer: Signer,

    /// openssl executable used by the openssl signer
    #[arg(long, env = "KUBEACCESS_OPENSSL", default_value = "openssl")]
    pub openssl_bin: PathBuf,

    /// Client key type
    #[arg(long, env = "KUBEACCESS_KEY_TYPE", value_enum, default_value_t = KeyType::Rsa)]
    pub key_type: KeyType,

    /// RSA key size in bits
    #[arg(long, env = "KUBEACCESS_RSA_BITS", default_value_t = 4096)]
    pub rsa_bits: u32,

    /// Certificate validity in days
    #[arg(long, env = "KUBEACCESS_VALIDITY_DAYS", default_value_t = crate::pki::DEFAULT_VALIDITY_DAYS)]
    pub validity_days: u32,

    /// Parent directory for per-request scratch directories [default: system temp dir]
    #[arg(long, env = "KUBEACCESS_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Bound on each signing backend call, in seconds
    #[arg(long, env = "KUBEACCESS_SIGNING_TIMEOUT_SECS", default_value_t = 60)]
    pub signing_timeout_secs: u64,

    /// Bound on each resource store call, in seconds
    #[arg(long, env = "KUBEACCESS_STORE_TIMEOUT_SECS", default_value_t = 30)]
    pub store_timeout_secs: u64,

    /// Log line format
    #[arg(long, env = "KUBEACCESS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl ServeArgs {
    /// Check ranges and cross-flag consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validity_days < 1 {
            return Err(invalid("--validity-days", "must be at least 1"));
        }
        if self.key_type == KeyType::Rsa && self.rsa_bits < MIN_RSA_BITS {
            return Err(invalid(
                "--rsa-bits",
                format!("must be at least {MIN_RSA_BITS}, got {}", self.rsa_bits),
            ));
        }
        if self.signing_timeout_secs < 1 {
            return Err(invalid("--signing-timeout-secs", "must be at least 1"));
        }
        if self.store_timeout_secs < 1 {
            return Err(invalid("--store-timeout-secs", "must be at least 1"));
        }
        if self.signer == Signer::Native && self.key_type == KeyType::Rsa {
            return Err(invalid(
                "--key-type",
                "the native signer only supports ecdsa-p256; use --signer openssl for RSA",
            ));
        }
        if self.cluster_name.is_empty() {
            return Err(invalid("--cluster-name", "must not be empty"));
        }
        if !self.cluster_server.starts_with("https://") && !self.cluster_server.starts_with("http://")
        {
            return Err(invalid(
                "--cluster-server",
                format!("expected an http(s) URL, got {:?}", self.cluster_server),
            ));
        }
        Ok(())
    }

    /// Key algorithm implied by `--key-type` and `--rsa-bits`
    pub fn key_algorithm(&self) -> KeyAlgorithm {
        match self.key_type {
            KeyType::Rsa => KeyAlgorithm::Rsa {
                bits: self.rsa_bits,
            },
            KeyType::EcdsaP256 => KeyAlgorithm::EcdsaP256,
        }
    }

    /// CA paths, falling back to minikube's
    pub fn ca_paths(&self) -> Result<CaPaths, ConfigError> {
        let minikube = |file: &str, flag: &'static str| -> Result<PathBuf, ConfigError> {
            dirs::home_dir()
                .map(|home| home.join(".minikube").join(file))
                .ok_or(ConfigError::NoHomeDirectory { flag })
        };

        let cert = match &self.ca_cert {
            Some(path) => path.clone(),
            None => minikube("ca.crt", "--ca-cert")?,
        };
        let key = match &self.ca_key {
            Some(path) => path.clone(),
            None => minikube("ca.key", "--ca-key")?,
        };
        Ok(CaPaths { cert, key })
    }

    /// Issuance policy for the pipeline
    pub fn issuance_policy(&self) -> Result<IssuancePolicy, ConfigError> {
        Ok(IssuancePolicy {
            key_algorithm: self.key_algorithm(),
            validity_days: self.validity_days,
            ca: self.ca_paths()?,
            scratch_dir: self
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            stage_timeout: Duration::from_secs(self.signing_timeout_secs),
        })
    }

    /// The configured signing backend
    pub fn signing_backend(&self) -> Arc<dyn SigningBackend> {
        match self.signer {
            Signer::Openssl => Arc::new(OpensslBackend::new(self.openssl_bin.clone())),
            Signer::Native => Arc::new(NativeBackend::new()),
        }
    }

    /// Cluster written into issued kubeconfigs
    pub fn cluster_endpoint(&self) -> ClusterEndpoint {
        ClusterEndpoint {
            name: self.cluster_name.clone(),
            server: self.cluster_server.clone(),
        }
    }

    /// Bound on each resource store call
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}
