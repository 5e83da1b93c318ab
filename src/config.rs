//! Engine configuration.
//!
//! All policy knobs live in [`EngineConfig`]. It can be built in code with
//! the `with_*` methods or read from a JSON file; missing fields take their
//! defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Layout of the signature blocks drawn on the last page, in PDF points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Distance from the right and bottom page edges
    pub margin: f64,
    /// Block width
    pub block_width: f64,
    /// Block height
    pub block_height: f64,
    /// Vertical gap between stacked blocks
    pub gap: f64,
    /// Base font size; the signer name is drawn slightly larger
    pub font_size: f64,
    /// Side length of the QR code
    pub qr_size: f64,
    /// Caption drawn under the signer name
    pub verified_via_caption: String,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            margin: 36.0,
            block_width: 220.0,
            block_height: 64.0,
            gap: 8.0,
            font_size: 7.0,
            qr_size: 56.0,
            verified_via_caption: "Verified via Signflow PKI".to_string(),
        }
    }
}

/// Labels embedded in the `verification` section of QR payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationLabels {
    /// Who vouches for the signature
    pub verified_by: String,
    /// How the signature was produced
    pub verification_method: String,
}

impl Default for VerificationLabels {
    fn default() -> Self {
        Self {
            verified_by: "Signflow PKI".to_string(),
            verification_method: "RSA-SHA256 digital signature".to_string(),
        }
    }
}

/// Signing engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Validity of a newly created root CA, in days
    pub ca_validity_days: u32,
    /// Validity of user certificates, in days
    pub user_certificate_days: u32,
    /// RSA modulus size for all generated keys
    pub rsa_key_bits: usize,
    /// PBKDF2 iterations protecting exported private keys
    pub pbkdf2_iterations: u32,
    /// bcrypt cost for the passphrase commitment
    pub bcrypt_cost: u32,
    /// How many times certificate issuance is retried on a serial collision
    pub serial_retry_limit: u32,
    /// Signature block layout
    pub watermark: WatermarkConfig,
    /// QR payload verification labels
    pub verification: VerificationLabels,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create a configuration with production defaults.
    pub fn new() -> Self {
        Self {
            ca_validity_days: 3650,
            user_certificate_days: 365,
            rsa_key_bits: 2048,
            pbkdf2_iterations: 100_000,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            serial_retry_limit: 5,
            watermark: WatermarkConfig::default(),
            verification: VerificationLabels::default(),
        }
    }

    /// Read a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.rsa_key_bits < 1024 {
            return Err(Error::InvalidRequest(format!(
                "rsa_key_bits must be at least 1024, got {}",
                self.rsa_key_bits
            )));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(Error::InvalidRequest(format!(
                "bcrypt_cost must be between 4 and 31, got {}",
                self.bcrypt_cost
            )));
        }
        if self.pbkdf2_iterations == 0 || self.ca_validity_days == 0 || self.user_certificate_days == 0 {
            return Err(Error::InvalidRequest(
                "iteration counts and validity periods must be positive".to_string(),
            ));
        }
        let wm = &self.watermark;
        if wm.qr_size > wm.block_height || wm.qr_size >= wm.block_width {
            return Err(Error::InvalidRequest(
                "QR code must fit inside the signature block".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the root CA validity.
    pub fn with_ca_validity_days(mut self, days: u32) -> Self {
        self.ca_validity_days = days;
        self
    }

    /// Set the user certificate validity.
    pub fn with_user_certificate_days(mut self, days: u32) -> Self {
        self.user_certificate_days = days;
        self
    }

    /// Set the RSA key size.
    pub fn with_rsa_key_bits(mut self, bits: usize) -> Self {
        self.rsa_key_bits = bits;
        self
    }

    /// Set the PBKDF2 iteration count.
    pub fn with_pbkdf2_iterations(mut self, iterations: u32) -> Self {
        self.pbkdf2_iterations = iterations;
        self
    }

    /// Set the bcrypt cost.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Set the serial collision retry limit.
    pub fn with_serial_retry_limit(mut self, limit: u32) -> Self {
        self.serial_retry_limit = limit;
        self
    }

    /// Replace the watermark layout.
    pub fn with_watermark(mut self, watermark: WatermarkConfig) -> Self {
        self.watermark = watermark;
        self
    }

    /// Replace the verification labels.
    pub fn with_verification(mut self, labels: VerificationLabels) -> Self {
        self.verification = labels;
        self
    }

    /// Cheap settings for tests and local experiments: small keys, few
    /// iterations, minimum bcrypt cost.
    pub fn fast_insecure() -> Self {
        Self::new()
            .with_rsa_key_bits(1024)
            .with_pbkdf2_iterations(1_000)
            .with_bcrypt_cost(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ca_validity_days, 3650);
        assert_eq!(config.user_certificate_days, 365);
        assert_eq!(config.rsa_key_bits, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"user_certificate_days": 30, "watermark": {"margin": 20}}"#)
                .unwrap();
        assert_eq!(config.user_certificate_days, 30);
        assert_eq!(config.watermark.margin, 20.0);
        assert_eq!(config.watermark.block_width, 220.0);
        assert_eq!(config.rsa_key_bits, 2048);
    }

    #[test]
    fn test_validate_rejects_small_keys() {
        let config = EngineConfig::new().with_rsa_key_bits(512);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fast_insecure_is_valid() {
        assert!(EngineConfig::fast_insecure().validate().is_ok());
    }
}
