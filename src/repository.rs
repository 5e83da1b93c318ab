//! Transactional record store.
//!
//! All records live in one [`Tables`] value behind a mutex. A transaction
//! works on a copy and swaps it in only when the closure returns `Ok`, so a
//! failed multi-record update leaves nothing behind. Signing additionally
//! serializes on a per-session lock held for the whole operation.

use crate::error::{Error, Result};
use crate::model::{
    CertificateAuthority, Document, Signature, SignatureStatus, SigningSession, UserCertificate,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

/// Every record kind, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    /// Certificate authorities
    pub authorities: BTreeMap<Uuid, CertificateAuthority>,
    /// User certificates
    pub certificates: BTreeMap<Uuid, UserCertificate>,
    /// Documents
    pub documents: BTreeMap<Uuid, Document>,
    /// Signing sessions
    pub sessions: BTreeMap<Uuid, SigningSession>,
    /// Signature slots
    pub signatures: BTreeMap<Uuid, Signature>,
}

impl Tables {
    /// The non-revoked CA, if any.
    pub fn active_ca(&self) -> Option<&CertificateAuthority> {
        self.authorities.values().find(|ca| !ca.is_revoked)
    }

    /// Whether a CA or user certificate already carries `serial`.
    pub fn serial_in_use(&self, serial: &str) -> bool {
        self.authorities.values().any(|ca| ca.serial == serial)
            || self.certificates.values().any(|c| c.serial == serial)
    }

    /// Fetch a document.
    pub fn document(&self, id: Uuid) -> Result<&Document> {
        self.documents.get(&id).ok_or_else(|| Error::not_found("document", id))
    }

    /// Fetch a document for update.
    pub fn document_mut(&mut self, id: Uuid) -> Result<&mut Document> {
        self.documents.get_mut(&id).ok_or_else(|| Error::not_found("document", id))
    }

    /// Fetch a session.
    pub fn session(&self, id: Uuid) -> Result<&SigningSession> {
        self.sessions.get(&id).ok_or_else(|| Error::not_found("session", id))
    }

    /// Fetch a session for update.
    pub fn session_mut(&mut self, id: Uuid) -> Result<&mut SigningSession> {
        self.sessions.get_mut(&id).ok_or_else(|| Error::not_found("session", id))
    }

    /// Fetch a signature slot.
    pub fn signature(&self, id: Uuid) -> Result<&Signature> {
        self.signatures.get(&id).ok_or_else(|| Error::not_found("signature", id))
    }

    /// Fetch a signature slot for update.
    pub fn signature_mut(&mut self, id: Uuid) -> Result<&mut Signature> {
        self.signatures.get_mut(&id).ok_or_else(|| Error::not_found("signature", id))
    }

    /// Signatures of a session ordered by step.
    pub fn session_signatures(&self, session_id: Uuid) -> Vec<&Signature> {
        let mut sigs: Vec<&Signature> = self
            .signatures
            .values()
            .filter(|s| s.session_id == session_id)
            .collect();
        sigs.sort_by_key(|s| s.step_order);
        sigs
    }

    /// Signed signatures of a document ordered by step.
    pub fn signed_signatures_for_document(&self, document_id: Uuid) -> Vec<&Signature> {
        let mut sigs: Vec<&Signature> = self
            .signatures
            .values()
            .filter(|s| s.document_id == document_id && s.status == SignatureStatus::Signed)
            .collect();
        sigs.sort_by_key(|s| (s.step_order, s.signed_at));
        sigs
    }

    /// Session working on a document.
    pub fn session_for_document(&self, document_id: Uuid) -> Option<&SigningSession> {
        self.sessions.values().find(|s| s.document_id == document_id)
    }

    /// Document whose latest signed version hashes to `digest`.
    pub fn document_by_current_hash(&self, digest: &str) -> Option<&Document> {
        self.documents
            .values()
            .find(|d| d.current_hash.as_deref() == Some(digest))
    }

    /// Document whose upload hashes to `digest`.
    pub fn document_by_original_hash(&self, digest: &str) -> Option<&Document> {
        self.documents.values().find(|d| d.original_hash == digest)
    }
}

/// Shared record store.
#[derive(Debug, Default)]
pub struct Repository {
    state: Mutex<Tables>,
    session_locks: Mutex<HashMap<Uuid, Weak<Mutex<()>>>>,
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("record store lock poisoned".to_string())
}

impl Repository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `tables`.
    pub fn from_tables(tables: Tables) -> Self {
        Self {
            state: Mutex::new(tables),
            session_locks: Mutex::default(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.state.lock().map_err(poisoned)
    }

    /// Run `f` against a consistent view of the records.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let state = self.lock()?;
        Ok(f(&state))
    }

    /// Run `f` against a working copy and commit it if `f` succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let mut working = state.clone();
        let out = f(&mut working)?;
        *state = working;
        Ok(out)
    }

    /// Lock serializing all signing activity on one session.
    ///
    /// The table only keeps weak handles; a lock nobody holds is dropped and
    /// its entry pruned on the next miss.
    pub fn session_lock(&self, session_id: Uuid) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.session_locks.lock().map_err(poisoned)?;
        if let Some(lock) = locks.get(&session_id).and_then(Weak::upgrade) {
            return Ok(lock);
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(session_id, Arc::downgrade(&lock));
        Ok(lock)
    }

    /// Copy of all records.
    pub fn snapshot(&self) -> Result<Tables> {
        Ok(self.lock()?.clone())
    }

    /// Replace all records.
    pub fn restore(&self, tables: Tables) -> Result<()> {
        *self.lock()? = tables;
        Ok(())
    }

    /// Write all records to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(&*self.lock()?)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a store from a JSON file written by [`Repository::save_json`].
    /// A missing file yields an empty store.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read(path)?;
        Ok(Self::from_tables(serde_json::from_slice(&data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentMetadata, DocumentStatus};
    use chrono::Utc;

    fn document(hash: &str) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            owner_id: "owner".to_string(),
            title: "Contract".to_string(),
            original_filename: "contract.pdf".to_string(),
            original_file_path: "docs/original.pdf".to_string(),
            original_hash: hash.to_string(),
            current_hash: None,
            signed_file_path: None,
            status: DocumentStatus::Pending,
            metadata: DocumentMetadata {
                size: 10,
                mime: "application/pdf".to_string(),
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let repo = Repository::new();
        let doc = document("aa");
        let id = doc.id;
        let result: Result<()> = repo.transaction(|t| {
            t.documents.insert(id, doc);
            Err(Error::InvalidRequest("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(repo.read(|t| t.documents.is_empty()).unwrap());
    }

    #[test]
    fn test_committed_transaction_is_visible() {
        let repo = Repository::new();
        let doc = document("bb");
        let id = doc.id;
        repo.transaction(|t| {
            t.documents.insert(id, doc);
            Ok(())
        })
        .unwrap();
        let found = repo.read(|t| t.document_by_original_hash("bb").map(|d| d.id)).unwrap();
        assert_eq!(found, Some(id));
    }

    #[test]
    fn test_session_lock_is_shared_per_session() {
        let repo = Repository::new();
        let id = Uuid::new_v4();
        let a = repo.session_lock(id).unwrap();
        let b = repo.session_lock(id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = repo.session_lock(Uuid::new_v4()).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_released_session_locks_are_pruned() {
        let repo = Repository::new();
        for _ in 0..5 {
            drop(repo.session_lock(Uuid::new_v4()).unwrap());
        }
        let held = repo.session_lock(Uuid::new_v4()).unwrap();
        assert_eq!(repo.session_locks.lock().unwrap().len(), 1);

        let other = repo.session_lock(Uuid::new_v4()).unwrap();
        assert_eq!(repo.session_locks.lock().unwrap().len(), 2);
        drop((held, other));
    }

    #[test]
    fn test_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let repo = Repository::new();
        let doc = document("cc");
        let id = doc.id;
        repo.transaction(|t| {
            t.documents.insert(id, doc);
            Ok(())
        })
        .unwrap();
        repo.save_json(&path).unwrap();

        let loaded = Repository::load_json(&path).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), repo.snapshot().unwrap());
        assert!(Repository::load_json(dir.path().join("missing.json"))
            .unwrap()
            .snapshot()
            .unwrap()
            .documents
            .is_empty());
    }
}
