//! Tenant scope of every engine call.

use crate::error::{Error, Result};
use std::fmt;

/// The tenant on whose behalf the engine acts.
///
/// The secret keys the HMAC that derives certificate passphrases; it never
/// leaves the process and is redacted from `Debug` output.
#[derive(Clone)]
pub struct TenantContext {
    tenant_id: String,
    secret: Vec<u8>,
}

impl TenantContext {
    /// Create a context. The id becomes a path segment, so only ASCII
    /// letters, digits, `-` and `_` are accepted.
    pub fn new(tenant_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Result<Self> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty()
            || !tenant_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::InvalidRequest(format!("invalid tenant id '{}'", tenant_id)));
        }
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::InvalidRequest("tenant secret must not be empty".to_string()));
        }
        Ok(Self { tenant_id, secret })
    }

    /// Tenant id.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Blob path `tenants/{tenant_id}/{relative}`.
    pub fn path(&self, relative: &str) -> String {
        format!("tenants/{}/{}", self.tenant_id, relative.trim_start_matches('/'))
    }
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant_id", &self.tenant_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
