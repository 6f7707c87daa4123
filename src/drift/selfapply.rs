//! Self-apply event filtering:
//! the informer→reconciler→drift-event→informer path is a cycle by
//! design, broken here by recording the `resourceVersion` our own
//! apply produced and ignoring watch events that merely echo it back.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::objectset::ObjectKey;

#[derive(Debug, Default)]
pub struct SelfApplyTracker {
    last_applied_resource_version: Mutex<HashMap<ObjectKey, String>>,
}

impl SelfApplyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the `resourceVersion` observed immediately after we
    /// apply/replace `key`.
    pub fn record(&self, key: ObjectKey, resource_version: String) {
        self.last_applied_resource_version
            .lock()
            .unwrap()
            .insert(key, resource_version);
    }

    /// True if `observed_resource_version` is exactly the one we last
    /// recorded for `key` — i.e. this watch event is an echo of our own
    /// write, not an external mutation.
    pub fn is_self_apply(&self, key: &ObjectKey, observed_resource_version: &str) -> bool {
        self.last_applied_resource_version
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|rv| rv == observed_resource_version)
    }

    pub fn forget(&self, key: &ObjectKey) {
        self.last_applied_resource_version.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ObjectKey {
        ObjectKey {
            group: "".into(),
            version: "v1".into(),
            kind: "ConfigMap".into(),
            namespace: Some("ns".into()),
            name: "cm".into(),
        }
    }

    #[test]
    fn recorded_resource_version_is_recognized_as_self_apply() {
        let tracker = SelfApplyTracker::new();
        tracker.record(key(), "100".into());
        assert!(tracker.is_self_apply(&key(), "100"));
        assert!(!tracker.is_self_apply(&key(), "101"));
    }

    #[test]
    fn unknown_key_is_never_self_apply() {
        let tracker = SelfApplyTracker::new();
        assert!(!tracker.is_self_apply(&key(), "1"));
    }
}
