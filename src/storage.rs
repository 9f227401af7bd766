//! Non-owning object registry used to resolve `cid:` references.
//!
//! [`WeakStorage`] hands out fingerprints for objects it does not keep alive.
//! [`AttachmentScope`] owns the decoded parts of one request, registers them,
//! and removes its entries when it is dropped, so nothing outlives the request.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, trace};

use crate::error::{Result, SwaError};
use crate::model::part::DecodedBodyPart;
use crate::multipart::decoder::DecoderOptions;

/// Opaque handle: registry identity, per-registry counter and a random nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    registry: u64,
    counter: u64,
    nonce: u64,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}.{:x}.{:016x}", self.registry, self.counter, self.nonce)
    }
}

impl FromStr for Fingerprint {
    type Err = SwaError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || SwaError::MalformedFingerprint(s.to_string());
        let mut fields = s.split('.');
        let mut next_hex = || {
            fields
                .next()
                .filter(|f| !f.is_empty())
                .and_then(|f| u64::from_str_radix(f, 16).ok())
                .ok_or_else(malformed)
        };
        let registry = next_hex()?;
        let counter = next_hex()?;
        let nonce = next_hex()?;
        if fields.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            registry,
            counter,
            nonce,
        })
    }
}

/// A registry of weakly held objects, addressable by fingerprint.
///
/// Safe to share between threads; lookups never extend an object's lifetime
/// beyond the returned `Arc`.
pub struct WeakStorage<T> {
    id: u64,
    counter: AtomicU64,
    entries: Mutex<HashMap<u64, (u64, Weak<T>)>>,
}

impl<T> Default for WeakStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WeakStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStorage")
            .field("id", &format_args!("{:016x}", self.id))
            .field("entries", &self.len())
            .finish()
    }
}

impl<T> WeakStorage<T> {
    pub fn new() -> Self {
        Self {
            id: rand::random::<u64>(),
            counter: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, (u64, Weak<T>)>> {
        // Entries are replaced whole, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `object` without taking ownership of it.
    pub fn insert_object(&self, object: &Arc<T>) -> Fingerprint {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let fingerprint = Fingerprint {
            registry: self.id,
            counter,
            nonce: rand::random::<u64>(),
        };
        self.lock()
            .insert(counter, (fingerprint.nonce, Arc::downgrade(object)));
        trace!(%fingerprint, "Registered object");
        fingerprint
    }

    /// Look an object up by its fingerprint string.
    ///
    /// `MalformedFingerprint` means the string is not one of ours;
    /// `ObjectUnavailable` means it was, but the object is gone.
    pub fn retrieve_object(&self, fingerprint: &str) -> Result<Arc<T>> {
        let parsed: Fingerprint = fingerprint.parse()?;
        if parsed.registry != self.id {
            return Err(SwaError::MalformedFingerprint(format!(
                "{fingerprint} belongs to another registry"
            )));
        }

        let mut entries = self.lock();
        let weak = match entries.get(&parsed.counter) {
            Some((nonce, weak)) if *nonce == parsed.nonce => weak.clone(),
            _ => return Err(SwaError::ObjectUnavailable(fingerprint.to_string())),
        };
        match weak.upgrade() {
            Some(object) => {
                trace!(fingerprint, "Resolved object");
                Ok(object)
            }
            None => {
                entries.remove(&parsed.counter);
                Err(SwaError::ObjectUnavailable(fingerprint.to_string()))
            }
        }
    }

    /// Forget a fingerprint. Unknown fingerprints are ignored.
    pub fn remove(&self, fingerprint: &Fingerprint) {
        if fingerprint.registry != self.id {
            return;
        }
        let mut entries = self.lock();
        if entries
            .get(&fingerprint.counter)
            .is_some_and(|(nonce, _)| *nonce == fingerprint.nonce)
        {
            entries.remove(&fingerprint.counter);
        }
    }

    /// Drop entries whose object has been released. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, weak)| weak.strong_count() > 0);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The attachments of one request.
///
/// Owns the decoded parts and keeps their fingerprints in the shared
/// registry until it is dropped.
#[derive(Debug)]
pub struct AttachmentScope {
    storage: Arc<WeakStorage<DecodedBodyPart>>,
    parts: Vec<Arc<DecodedBodyPart>>,
    by_cid: HashMap<String, Fingerprint>,
}

impl AttachmentScope {
    pub fn new(storage: Arc<WeakStorage<DecodedBodyPart>>) -> Self {
        Self {
            storage,
            parts: Vec::new(),
            by_cid: HashMap::new(),
        }
    }

    /// Register decoded parts, splitting nested `multipart/mixed` containers.
    ///
    /// Parts without a Content-ID cannot be referenced and are skipped.
    pub fn register(&mut self, parts: Vec<DecodedBodyPart>, options: &DecoderOptions) -> Result<()> {
        for part in parts {
            if part.is_multipart_mixed {
                let nested = part.nested_parts(options)?;
                self.register(nested, options)?;
                continue;
            }
            let Some(cid) = part.content_id.clone() else {
                continue;
            };
            if self.by_cid.contains_key(&cid) {
                return Err(SwaError::MalformedBody(format!("duplicate Content-ID {cid}")));
            }
            let part = Arc::new(part);
            let fingerprint = self.storage.insert_object(&part);
            debug!(content_id = %cid, %fingerprint, "Registered attachment");
            self.by_cid.insert(cid, fingerprint);
            self.parts.push(part);
        }
        Ok(())
    }

    /// Fingerprint for a normalized `cid:<token>`.
    pub fn fingerprint(&self, content_id: &str) -> Option<String> {
        self.by_cid.get(content_id).map(Fingerprint::to_string)
    }

    /// Registry the parts are indexed in.
    pub fn storage(&self) -> &WeakStorage<DecodedBodyPart> {
        &self.storage
    }

    /// Resolve a `cid:<token>` through the registry.
    ///
    /// Returns `Ok(None)` when no part with that Content-ID was received.
    pub fn resolve(&self, content_id: &str) -> Result<Option<Arc<DecodedBodyPart>>> {
        match self.fingerprint(content_id) {
            Some(fp) => self.storage.retrieve_object(&fp).map(Some),
            None => Ok(None),
        }
    }

    /// Registered parts, in registration order.
    pub fn parts(&self) -> impl Iterator<Item = &DecodedBodyPart> {
        self.parts.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl Drop for AttachmentScope {
    fn drop(&mut self) {
        for fingerprint in self.by_cid.values() {
            self.storage.remove(fingerprint);
        }
        trace!(released = self.by_cid.len(), "Attachment scope closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::header::HeaderMap;

    fn part(cid: Option<&str>) -> DecodedBodyPart {
        DecodedBodyPart {
            headers: HeaderMap::new(),
            content: b"data".to_vec(),
            content_type: "application/octet-stream".into(),
            charset: None,
            filename: None,
            content_id: cid.map(String::from),
            is_attachment: true,
            is_multipart_mixed: false,
            size: 4,
        }
    }

    #[test]
    fn test_insert_and_retrieve() {
        let storage = WeakStorage::new();
        let object = Arc::new(String::from("hello"));
        let fp = storage.insert_object(&object);
        let back = storage.retrieve_object(&fp.to_string()).unwrap();
        assert!(Arc::ptr_eq(&object, &back));
    }

    #[test]
    fn test_released_object_unavailable() {
        let storage = WeakStorage::new();
        let object = Arc::new(42u32);
        let fp = storage.insert_object(&object).to_string();
        drop(object);
        assert!(matches!(
            storage.retrieve_object(&fp),
            Err(SwaError::ObjectUnavailable(_))
        ));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_malformed_fingerprints() {
        let storage: WeakStorage<u32> = WeakStorage::new();
        for bad in ["", "abc", "1.2", "1.2.3.4", "zz.1.1", "1..1"] {
            assert!(
                matches!(storage.retrieve_object(bad), Err(SwaError::MalformedFingerprint(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_foreign_registry_rejected() {
        let a = WeakStorage::new();
        let b: WeakStorage<u32> = WeakStorage::new();
        let object = Arc::new(1u32);
        let fp = a.insert_object(&object).to_string();
        assert!(matches!(
            b.retrieve_object(&fp),
            Err(SwaError::MalformedFingerprint(_))
        ));
    }

    #[test]
    fn test_wrong_nonce_unavailable() {
        let storage = WeakStorage::new();
        let object = Arc::new(1u32);
        let fp = storage.insert_object(&object);
        let forged = Fingerprint {
            nonce: fp.nonce.wrapping_add(1),
            ..fp
        };
        assert!(matches!(
            storage.retrieve_object(&forged.to_string()),
            Err(SwaError::ObjectUnavailable(_))
        ));
    }

    #[test]
    fn test_fingerprints_unique() {
        let storage = WeakStorage::new();
        let object = Arc::new(0u8);
        let a = storage.insert_object(&object);
        let b = storage.insert_object(&object);
        assert_ne!(a, b);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_purge() {
        let storage = WeakStorage::new();
        let keep = Arc::new(1u8);
        storage.insert_object(&keep);
        storage.insert_object(&Arc::new(2u8));
        assert_eq!(storage.purge(), 1);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_scope_drop_releases_entries() {
        let storage = Arc::new(WeakStorage::new());
        let fp = {
            let mut scope = AttachmentScope::new(Arc::clone(&storage));
            scope
                .register(vec![part(Some("cid:a")), part(None)], &DecoderOptions::default())
                .unwrap();
            assert_eq!(scope.len(), 1);
            assert!(scope.resolve("cid:a").unwrap().is_some());
            assert!(scope.resolve("cid:missing").unwrap().is_none());
            scope.fingerprint("cid:a").unwrap()
        };
        assert!(storage.is_empty());
        assert!(matches!(
            storage.retrieve_object(&fp),
            Err(SwaError::ObjectUnavailable(_))
        ));
    }

    #[test]
    fn test_scope_rejects_duplicate_cid() {
        let mut scope = AttachmentScope::new(Arc::new(WeakStorage::new()));
        let err = scope
            .register(vec![part(Some("cid:a")), part(Some("cid:a"))], &DecoderOptions::default())
            .unwrap_err();
        assert!(matches!(err, SwaError::MalformedBody(_)));
    }
}
