//! kubeaccess - Kubernetes access provisioning
//!
//! Turns a username into two things a person needs to use a cluster:
//! RBAC grants scoped to that username, and a kubeconfig carrying a client
//! certificate whose Common Name is exactly that username.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────┐      ┌────────────────┐
//!  HTTP (axum) ──►│  RbacManager     │─────►│ ResourceStore  │ (kube-rs)
//!                 └──────────────────┘      └────────────────┘
//!                 ┌──────────────────┐      ┌────────────────┐
//!             ──► │ IssuancePipeline │─────►│ SigningBackend │ (openssl / rcgen)
//!                 └────────┬─────────┘      └────────────────┘
//!                          ▼
//!                 ┌──────────────────┐
//!                 │ kubeconfig       │ (typed document, rendered as YAML)
//!                 └──────────────────┘
//! ```
//!
//! The RBAC side and the credential side are independent capabilities; the
//! HTTP surface exposes each on its own endpoints.
//!
//! # Modules
//!
//! - [`identity`] - Validated usernames
//! - [`pki`] - Certificate issuance pipeline and signing backends
//! - [`rbac`] - Role / ClusterRole / binding management
//! - [`kubeconfig`] - Access-credential document assembly
//! - [`server`] - HTTP surface
//! - [`config`] - Command-line and environment configuration
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod identity;
pub mod kubeconfig;
pub mod pki;
pub mod rbac;
pub mod server;
pub mod telemetry;

pub use error::Error;
pub use identity::Identity;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port for the HTTP API
pub const DEFAULT_PORT: u16 = 4000;

/// Label recording the identity a binding was generated for
pub const OWNER_LABEL: &str = "generated_for_user";

/// API group of every RBAC role reference created by this crate
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
