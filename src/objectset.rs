//! C3 — Object Set: indexing of rendered/live objects by
//! Group/Version/Kind/Namespace/Name with stable iteration order.
//!
//! Mirrors stackable-operator's `ClusterResources` idea of identifying
//! resources by a handful of well-known coordinates, but keyed
//! generically over GVK rather than a closed list of `k8s_openapi`
//! types, since the renderer deals in `DynamicObject`.

use indexmap::IndexMap;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;

/// Identity of a live or desired object: GVK plus namespace/name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

/// Recovers the `GroupVersionKind` a `DynamicObject` carries in its
/// `TypeMeta`, for callers (renderer output, manifest replay) that only
/// have the object itself and not an already-known GVK.
pub fn gvk_of(obj: &DynamicObject) -> GroupVersionKind {
    let types = obj.types.clone().unwrap_or_default();
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), types.api_version),
    };
    GroupVersionKind { group, version, kind: types.kind }
}

impl ObjectKey {
    pub fn from_gvk_and_object(gvk: &GroupVersionKind, obj: &DynamicObject) -> Self {
        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
        }
    }

    /// Re-key an object-less namespace against a default namespace, used
    /// by the diff engine's empty-namespace lookup fallback: when a
    /// desired object has no namespace but the live key is namespaced
    /// (or vice versa), the comparison must still find its counterpart.
    pub fn with_default_namespace(&self, default_namespace: &str) -> Self {
        if self.namespace.is_some() {
            return self.clone();
        }
        let mut k = self.clone();
        k.namespace = Some(default_namespace.to_string());
        k
    }

    pub fn without_namespace(&self) -> Self {
        let mut k = self.clone();
        k.namespace = None;
        k
    }
}

/// `GVK -> (Namespace, Name) -> object`, preserving insertion order
/// within a GVK bucket so diffs are deterministic across reconciles.
#[derive(Debug, Default)]
pub struct ObjectSet {
    buckets: IndexMap<GvkKey, IndexMap<ObjectKey, DynamicObject>>,
}

/// `GroupVersionKind` doesn't implement `Hash`/`Eq` upstream, so we key
/// buckets on our own tuple form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct GvkKey(String, String, String);

impl From<&GroupVersionKind> for GvkKey {
    fn from(gvk: &GroupVersionKind) -> Self {
        GvkKey(gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())
    }
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) insertion; preserves insertion order within a GVK bucket.
    pub fn add(&mut self, gvk: GroupVersionKind, obj: DynamicObject) {
        let key = ObjectKey::from_gvk_and_object(&gvk, &obj);
        self.buckets
            .entry(GvkKey::from(&gvk))
            .or_default()
            .insert(key, obj);
    }

    pub fn contains(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> bool {
        self.buckets
            .get(&GvkKey::from(gvk))
            .is_some_and(|bucket| bucket.contains_key(key))
    }

    pub fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Option<&DynamicObject> {
        self.buckets.get(&GvkKey::from(gvk)).and_then(|b| b.get(key))
    }

    /// Returns the nested mapping for stable iteration, e.g. by the plan
    /// builder classifying Create/Update/Delete per GVK.
    pub fn objects_by_gvk(&self) -> impl Iterator<Item = (GroupVersionKind, &IndexMap<ObjectKey, DynamicObject>)> {
        self.buckets.iter().map(|(k, v)| {
            (
                GroupVersionKind {
                    group: k.0.clone(),
                    version: k.1.clone(),
                    kind: k.2.clone(),
                },
                v,
            )
        })
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens every GVK bucket into one `ObjectKey -> DynamicObject`
    /// map, the shape the release engine applies objects from.
    pub fn flatten(&self) -> IndexMap<ObjectKey, DynamicObject> {
        let mut out = IndexMap::new();
        for bucket in self.buckets.values() {
            for (key, obj) in bucket {
                out.insert(key.clone(), obj.clone());
            }
        }
        out
    }
}
