//! PKI value types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Subject of a certificate the engine creates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistinguishedName {
    /// CN
    pub common_name: String,
    /// O
    pub organization: Option<String>,
    /// OU
    pub organizational_unit: Option<String>,
    /// C (two-letter country code)
    pub country: Option<String>,
}

/// Escape an attribute value for an RFC 4514 string.
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == '#' || c == ' '))
            || (i == last && c == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl DistinguishedName {
    /// Subject with only a common name.
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Default::default()
        }
    }

    /// Set O.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Set OU.
    pub fn with_organizational_unit(mut self, unit: impl Into<String>) -> Self {
        self.organizational_unit = Some(unit.into());
        self
    }

    /// Set C.
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// RFC 4514 string form, most specific attribute first.
    pub fn to_rfc4514(&self) -> String {
        let mut parts = vec![format!("CN={}", escape_value(&self.common_name))];
        if let Some(ou) = &self.organizational_unit {
            parts.push(format!("OU={}", escape_value(ou)));
        }
        if let Some(o) = &self.organization {
            parts.push(format!("O={}", escape_value(o)));
        }
        if let Some(c) = &self.country {
            parts.push(format!("C={}", escape_value(c)));
        }
        parts.join(",")
    }
}

/// A freshly issued certificate and its private key.
#[derive(Clone)]
pub struct IssuedCertificate {
    /// PEM certificate
    pub certificate_pem: String,
    /// PEM private key (PKCS#8; encrypted for user certificates)
    pub private_key_pem: String,
    /// Serial as lowercase hex of the encoded integer bytes
    pub serial: String,
    /// Start of validity
    pub valid_from: DateTime<Utc>,
    /// End of validity
    pub valid_to: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("serial", &self.serial)
            .field("valid_from", &self.valid_from)
            .field("valid_to", &self.valid_to)
            .field("certificate_pem", &format!("{} bytes", self.certificate_pem.len()))
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Decoded facts about a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateDetails {
    /// Subject CN
    pub subject_common_name: Option<String>,
    /// Issuer CN
    pub issuer_common_name: Option<String>,
    /// RFC 822 SubjectAltName entries
    pub emails: Vec<String>,
    /// Serial as lowercase hex
    pub serial: String,
    /// Start of validity
    pub valid_from: DateTime<Utc>,
    /// End of validity
    pub valid_to: DateTime<Utc>,
    /// Basic constraints CA flag
    pub is_ca: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4514_escaping() {
        let dn = DistinguishedName::new("Doe, Jane")
            .with_organization("Acme+Co")
            .with_country("US");
        assert_eq!(dn.to_rfc4514(), "CN=Doe\\, Jane,O=Acme\\+Co,C=US");
    }

    #[test]
    fn test_leading_and_trailing_spaces() {
        assert_eq!(escape_value(" x "), "\\ x\\ ");
        assert_eq!(escape_value("#tag"), "\\#tag");
    }

    #[test]
    fn test_debug_redacts_key() {
        let issued = IssuedCertificate {
            certificate_pem: "cert".to_string(),
            private_key_pem: "secret key material".to_string(),
            serial: "01".to_string(),
            valid_from: Utc::now(),
            valid_to: Utc::now(),
        };
        let shown = format!("{:?}", issued);
        assert!(!shown.contains("secret key material"));
        assert!(shown.contains("REDACTED"));
    }
}
