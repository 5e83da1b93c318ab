//! Signer directory boundary.
//!
//! Names and e-mail addresses of users live in the host application. The
//! engine asks for them through [`SignerDirectory`] when it renders
//! signature blocks and verification results.

use crate::model::{Signer, UserId};
use std::collections::HashMap;

/// Resolves user ids to display details.
pub trait SignerDirectory: Send + Sync {
    /// Look a user up. `None` when unknown.
    fn lookup(&self, user_id: &str) -> Option<Signer>;

    /// Display name, falling back to the user id.
    fn display_name(&self, user_id: &str) -> String {
        self.lookup(user_id)
            .map(|s| s.name)
            .unwrap_or_else(|| user_id.to_string())
    }
}

/// In-memory directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: HashMap<UserId, Signer>,
}

impl StaticDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, signer: Signer) {
        self.entries.insert(signer.user_id.clone(), signer);
    }

    /// Builder form of [`StaticDirectory::insert`].
    pub fn with_signer(
        mut self,
        user_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        self.insert(Signer {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
        });
        self
    }

    /// All entries, in no particular order.
    pub fn signers(&self) -> impl Iterator<Item = &Signer> {
        self.entries.values()
    }
}

impl SignerDirectory for StaticDirectory {
    fn lookup(&self, user_id: &str) -> Option<Signer> {
        self.entries.get(user_id).cloned()
    }
}
