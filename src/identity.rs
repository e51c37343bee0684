//! User identities
//!
//! An [`Identity`] is the username a credential is issued for. It becomes the
//! certificate Common Name verbatim and, for bindings, the value of the
//! ownership label, so it is validated once at the edge and carried around as
//! a type afterwards.

use std::fmt;

use crate::Error;

/// Upper bound on a Common Name (X.509 `ub-common-name`)
pub const MAX_COMMON_NAME_LEN: usize = 64;

/// Upper bound on a Kubernetes label value
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Characters that are structural in a distinguished name (`/CN=...`)
const DN_STRUCTURAL_CHARS: &[char] = &['/', ',', '=', '+', '\\', '"', '<', '>', ';', '#'];

/// A validated username
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Validate a raw username
    ///
    /// The string is kept byte-for-byte; nothing is trimmed or escaped.
    pub fn new(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();

        if raw.is_empty() {
            return Err(Error::validation_for_field(
                "username",
                "username must not be empty",
            ));
        }
        if raw.chars().count() > MAX_COMMON_NAME_LEN {
            return Err(Error::validation_for_field(
                "username",
                format!("username must be at most {MAX_COMMON_NAME_LEN} characters"),
            ));
        }
        if raw.trim() != raw {
            return Err(Error::validation_for_field(
                "username",
                "username must not start or end with whitespace",
            ));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| c.is_control() || DN_STRUCTURAL_CHARS.contains(c))
        {
            return Err(Error::validation_for_field(
                "username",
                format!("username contains forbidden character {c:?}"),
            ));
        }

        Ok(Self(raw))
    }

    /// The username as given
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The username as a Kubernetes label value
    ///
    /// Label values are far more restricted than Common Names, so an identity
    /// that is fine for a certificate may still be refused here.
    pub fn as_label_value(&self) -> Result<&str, Error> {
        if is_label_value(&self.0) {
            Ok(&self.0)
        } else {
            Err(Error::validation_for_field(
                "user",
                format!(
                    "user {:?} cannot be recorded in the {} label: label values are at most \
                     {MAX_LABEL_VALUE_LEN} characters of [A-Za-z0-9._-], alphanumeric at both ends",
                    self.0,
                    crate::OWNER_LABEL
                ),
            ))
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check a string against the Kubernetes label value syntax
pub fn is_label_value(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_LABEL_VALUE_LEN {
        return false;
    }
    let bytes = value.as_bytes();
    let alnum_ends =
        bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric();
    alnum_ends
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
