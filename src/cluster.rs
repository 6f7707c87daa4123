//! Thin abstraction over "do something to the live cluster", so the
//! Release Engine (C7), Plan Builder (C6) live-object enumeration, and
//! Drift Corrector (C8) share one seam for API server I/O and can be
//! exercised in tests against an in-memory fake instead of a real
//! `kube::Client`.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::Discovery;
use kube::Client;

use crate::error::Error;
use crate::objectset::ObjectKey;

pub const FIELD_MANAGER: &str = "fleet-agent";

#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Force server-side apply (this agent takes field ownership
    /// outright), used for install/upgrade.
    async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Non-forcing server-side apply, used for non-force rollback: if a
    /// prior out-of-band change took ownership of a field this patch
    /// touches (e.g. a list entry edited directly), the API server
    /// rejects it with a conflict instead of us silently overwriting it.
    async fn apply_merge(&self, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// PUT-style replace, used for force rollback: succeeds
    /// across in-list mutations but may trigger recreate for immutable
    /// fields.
    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error>;

    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error>;

    /// Lists every live object of `gvk` carrying `label_selector`.
    /// `namespace` scopes
    /// the list; `None` lists across the whole cluster, needed since a
    /// bundle's objects can land in more than one namespace.
    async fn list_owned(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;
}

/// Real-cluster implementation, resolving GVKs through
/// `kube::discovery` the way a generic controller (rather than one
/// compiled against a fixed set of `k8s_openapi` types) must.
pub struct KubeClusterApplier {
    client: Client,
    discovery: tokio::sync::RwLock<Discovery>,
}

impl KubeClusterApplier {
    pub async fn new(client: Client) -> Result<Self, Error> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: tokio::sync::RwLock::new(discovery),
        })
    }

    async fn api_for(&self, key: &ObjectKey) -> Result<Api<DynamicObject>, Error> {
        let gvk = key.gvk();
        {
            let discovery = self.discovery.read().await;
            if let Some((ar, _caps)) = discovery.resolve_gvk(&gvk) {
                return Ok(match &key.namespace {
                    Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
                    None => Api::all_with(self.client.clone(), &ar),
                });
            }
        }

        // Refresh once on a miss: a CRD may have been installed after
        // this applier was constructed.
        let mut discovery = self.discovery.write().await;
        *discovery = Discovery::new(self.client.clone()).run().await?;
        let (ar, _caps) = discovery
            .resolve_gvk(&gvk)
            .ok_or_else(|| Error::Install(format!("unknown GVK: {}/{} {}", gvk.group, gvk.version, gvk.kind)))?;
        Ok(match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl ClusterApplier for KubeClusterApplier {
    async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = object_key(obj);
        let api = self.api_for(&key).await?;
        let name = obj.metadata.name.clone().unwrap_or_default();
        Ok(api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(obj))
            .await?)
    }

    async fn apply_merge(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = object_key(obj);
        let api = self.api_for(&key).await?;
        let name = obj.metadata.name.clone().unwrap_or_default();
        Ok(api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(obj))
            .await?)
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = object_key(obj);
        let api = self.api_for(&key).await?;
        let name = obj.metadata.name.clone().unwrap_or_default();

        let mut to_put = obj.clone();
        if let Some(existing) = api.get(&name).await.ok() {
            to_put.metadata.resource_version = existing.metadata.resource_version.clone();
        }
        Ok(api.replace(&name, &Default::default(), &to_put).await?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        let api = self.api_for(key).await?;
        match api.delete(&key.name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
        let api = self.api_for(key).await?;
        match api.get(&key.name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_owned(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let ar = {
            let discovery = self.discovery.read().await;
            discovery.resolve_gvk(gvk).map(|(ar, _caps)| ar.clone())
        }
        .ok_or_else(|| Error::Install(format!("unknown GVK: {}/{} {}", gvk.group, gvk.version, gvk.kind)))?;

        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let list = api
            .list(&kube::api::ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }
}

fn object_key(obj: &DynamicObject) -> ObjectKey {
    let api_version = obj.types.as_ref().map(|t| t.api_version.clone()).unwrap_or_default();
    let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version),
    };
    ObjectKey {
        group,
        version,
        kind,
        namespace: obj.metadata.namespace.clone(),
        name: obj.metadata.name.clone().unwrap_or_default(),
    }
}
