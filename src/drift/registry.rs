//! Dynamic informer registry: tracks which GVKs currently need a
//! watcher running, reference-counted since multiple releases can
//! share a GVK (e.g. two bundles both managing ConfigMaps). A shared,
//! mutex-guarded map rather than per-release state.

use std::collections::HashMap;
use std::sync::Mutex;

use kube::api::GroupVersionKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GvkKey(String, String, String);

impl From<&GroupVersionKind> for GvkKey {
    fn from(gvk: &GroupVersionKind) -> Self {
        GvkKey(gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())
    }
}

#[derive(Debug, Default)]
pub struct InformerRegistry {
    refcounts: Mutex<HashMap<GvkKey, usize>>,
}

impl InformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `gvk`. Returns `true` the first time any
    /// caller registers it, signaling the caller should actually start
    /// a watcher; subsequent registrations just bump the refcount.
    pub fn register(&self, gvk: &GroupVersionKind) -> bool {
        let mut refcounts = self.refcounts.lock().unwrap();
        let count = refcounts.entry(GvkKey::from(gvk)).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Releases one interest in `gvk`. Returns `true` when the refcount
    /// reaches zero, signaling the caller should stop the watcher.
    pub fn release(&self, gvk: &GroupVersionKind) -> bool {
        let mut refcounts = self.refcounts.lock().unwrap();
        let key = GvkKey::from(gvk);
        let Some(count) = refcounts.get_mut(&key) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            refcounts.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn is_registered(&self, gvk: &GroupVersionKind) -> bool {
        self.refcounts.lock().unwrap().contains_key(&GvkKey::from(gvk))
    }
}
