//! HMAC-SHA256 signature verification over raw webhook bodies.
//!
//! Accepted header forms:
//!
//! | Form | Example |
//! |------|---------|
//! | prefixed | `sha256=5d41...` |
//! | versioned | `v1,5d41...` |
//! | bare hex | `5d41...` |
//!
//! Hex digits are case-insensitive and an optional `0x` prefix is tolerated.
//! The digest is always computed over the exact bytes received, never over
//! re-serialized JSON. Secrets and signature values are never logged.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Secret
// ============================================================================

/// Shared webhook secret.
///
/// Zeroized on drop and redacted in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WebhookSecret {
    value: Vec<u8>,
}

impl WebhookSecret {
    /// Take ownership of a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into().into_bytes(),
        }
    }

    /// Secret bytes, for immediate use as an HMAC key only.
    pub fn expose_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Check if secret is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSecret")
            .field("value", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Signature formats and errors
// ============================================================================

/// Header encoding of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFormat {
    /// `sha256=<hex>`
    Sha256Prefixed,
    /// `v1,<hex>`
    Versioned,
    /// `<hex>`
    BareHex,
}

impl SignatureFormat {
    /// Render a digest in this format.
    pub fn render(&self, digest: &[u8]) -> String {
        let hex = hex::encode(digest);
        match self {
            Self::Sha256Prefixed => format!("sha256={}", hex),
            Self::Versioned => format!("v1,{}", hex),
            Self::BareHex => hex,
        }
    }
}

/// Signature verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,

    #[error("Unsupported signature format")]
    UnsupportedFormat,

    #[error("Webhook secret is not configured")]
    MissingSecret,

    #[error("Signature verification failed")]
    Mismatch,
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies HMAC-SHA256 webhook signatures in constant time.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<WebhookSecret>,
}

impl SignatureVerifier {
    /// Create a verifier. A `None` or empty secret fails every verification.
    pub fn new(secret: Option<WebhookSecret>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Whether a usable secret is configured.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `header` against the HMAC of `body`.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(SignatureError::Missing)?;
        let (_, provided) = parse_signature_header(header)?;

        let secret = self.secret.as_ref().ok_or(SignatureError::MissingSecret)?;
        let expected = compute_digest(secret, body)?;

        // ct_eq on slices of unequal length is false without early exit on content
        if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produce a signature header for `body` in the requested format.
    pub fn sign(&self, body: &[u8], format: SignatureFormat) -> Result<String, SignatureError> {
        let secret = self.secret.as_ref().ok_or(SignatureError::MissingSecret)?;
        let digest = compute_digest(secret, body)?;
        Ok(format.render(&digest))
    }
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("has_secret", &self.secret.is_some())
            .finish()
    }
}

/// Parse a signature header into its format and raw digest bytes.
pub fn parse_signature_header(header: &str) -> Result<(SignatureFormat, Vec<u8>), SignatureError> {
    let header = header.trim();
    let lowered = header.to_ascii_lowercase();

    let (format, rest) = if lowered.starts_with("sha256=") {
        (SignatureFormat::Sha256Prefixed, &header["sha256=".len()..])
    } else if lowered.starts_with("v1,") {
        (SignatureFormat::Versioned, &header["v1,".len()..])
    } else {
        (SignatureFormat::BareHex, header)
    };

    let rest = rest.trim();
    let hex_part = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .unwrap_or(rest);

    if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SignatureError::UnsupportedFormat);
    }

    let bytes = hex::decode(hex_part).map_err(|_| SignatureError::UnsupportedFormat)?;
    Ok((format, bytes))
}

fn compute_digest(secret: &WebhookSecret, body: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.expose_bytes()).map_err(|_| SignatureError::MissingSecret)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
