//! Helm-compatible persistence for release revisions: Secrets of type
//! `helm.sh/release.v1`, gzip+base64 encoded exactly as real Helm
//! encodes its release payload, so the agent's releases are
//! inspectable with standard Helm tooling.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use async_trait::async_trait;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const RELEASE_SECRET_TYPE: &str = "helm.sh/release.v1";
pub const LABEL_RELEASE_NAME: &str = "name";
pub const LABEL_RELEASE_VERSION: &str = "version";
pub const LABEL_RELEASE_STATUS: &str = "status";
pub const LABEL_RELEASE_OWNER: &str = "owner";
pub const ANNOTATION_BUNDLE_ID: &str = "fleet.cattle.io/bundle-id";
pub const ANNOTATION_AGENT_NAMESPACE: &str = "fleet.cattle.io/agent-namespace";

/// Identifies a release: `(namespace, releaseName)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseKey {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionStatus {
    Deployed,
    Superseded,
    Failed,
    Uninstalled,
}

/// One installed/upgraded revision of a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRevision {
    pub revision: u32,
    pub bundle_id: String,
    pub deployment_id: String,
    pub manifest_yaml: String,
    pub values: serde_json::Value,
    pub status: RevisionStatus,
}

/// Abstracts Helm-secret-backed persistence so the release engine can
/// be tested against an in-memory fake instead of a live API server;
/// the production store keeps no in-memory cache of revisions —
/// Secrets are the source of truth.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn list_revisions(&self, key: &ReleaseKey) -> Result<Vec<ReleaseRevision>, Error>;
    /// Persists `revision`, stamping it with `agent_namespace` so
    /// `list_owned_by_agent` can later filter out releases other agents
    /// sharing this cluster happen to store in the same namespace.
    async fn save_revision(&self, key: &ReleaseKey, agent_namespace: &str, revision: ReleaseRevision) -> Result<(), Error>;
    async fn delete_revision(&self, key: &ReleaseKey, revision: u32) -> Result<(), Error>;
    /// Enumerates every release namespace/name this store knows about
    /// that was stamped with `agent_namespace`.
    async fn list_owned_by_agent(&self, agent_namespace: &str) -> Result<Vec<ReleaseKey>, Error>;
}

pub struct SecretReleaseStore {
    client: kube::Client,
}

impl SecretReleaseStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn secret_name(key: &ReleaseKey, revision: u32) -> String {
        format!("sh.helm.release.v1.{}.v{}", key.name, revision)
    }

    fn encode(revision: &ReleaseRevision) -> Result<String, Error> {
        let json = serde_json::to_vec(revision)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| Error::Install(format!("gzip release payload: {e}")))?;
        let gzipped = encoder
            .finish()
            .map_err(|e| Error::Install(format!("finish gzip: {e}")))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(gzipped))
    }

    fn decode(encoded: &[u8]) -> Result<ReleaseRevision, Error> {
        let gzipped = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Install(format!("base64 decode release payload: {e}")))?;
        let mut decoder = GzDecoder::new(&gzipped[..]);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| Error::Install(format!("gunzip release payload: {e}")))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[async_trait]
impl ReleaseStore for SecretReleaseStore {
    async fn list_revisions(&self, key: &ReleaseKey) -> Result<Vec<ReleaseRevision>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let selector = format!("{LABEL_RELEASE_NAME}={}", key.name);
        let list = api
            .list(&kube::api::ListParams::default().labels(&selector))
            .await?;

        let mut revisions = Vec::new();
        for secret in list.items {
            let Some(data) = secret.data.as_ref().and_then(|d| d.get("release")) else {
                continue;
            };
            revisions.push(Self::decode(&data.0)?);
        }
        revisions.sort_by_key(|r| r.revision);
        Ok(revisions)
    }

    async fn save_revision(&self, key: &ReleaseKey, agent_namespace: &str, revision: ReleaseRevision) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let encoded = Self::encode(&revision)?;

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_RELEASE_NAME.to_string(), key.name.clone());
        labels.insert(LABEL_RELEASE_VERSION.to_string(), revision.revision.to_string());
        labels.insert(
            LABEL_RELEASE_STATUS.to_string(),
            format!("{:?}", revision.status).to_lowercase(),
        );
        labels.insert(LABEL_RELEASE_OWNER.to_string(), "fleet".to_string());

        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_BUNDLE_ID.to_string(), revision.bundle_id.clone());
        annotations.insert(ANNOTATION_AGENT_NAMESPACE.to_string(), agent_namespace.to_string());

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(Self::secret_name(key, revision.revision)),
                namespace: Some(key.namespace.clone()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            type_: Some(RELEASE_SECRET_TYPE.to_string()),
            data: Some(BTreeMap::from([(
                "release".to_string(),
                ByteString(encoded.into_bytes()),
            )])),
            ..Default::default()
        };

        api.patch(
            &secret.metadata.name.clone().unwrap(),
            &PatchParams::apply("fleet-agent").force(),
            &Patch::Apply(&secret),
        )
        .await?;
        Ok(())
    }

    async fn delete_revision(&self, key: &ReleaseKey, revision: u32) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let name = Self::secret_name(key, revision);
        match api.delete(&name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_owned_by_agent(&self, agent_namespace: &str) -> Result<Vec<ReleaseKey>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), agent_namespace);
        let list = api
            .list(&kube::api::ListParams::default().labels(&format!("{LABEL_RELEASE_OWNER}=fleet")))
            .await?;

        let mut keys: Vec<ReleaseKey> = Vec::new();
        for secret in list.items {
            let is_ours = secret
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_AGENT_NAMESPACE))
                .is_some_and(|ns| ns == agent_namespace);
            if !is_ours {
                continue;
            }
            let Some(name) = secret.metadata.labels.as_ref().and_then(|l| l.get(LABEL_RELEASE_NAME)) else {
                continue;
            };
            let namespace = secret.metadata.namespace.clone().unwrap_or_default();
            let key = ReleaseKey { namespace, name: name.clone() };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let revision = ReleaseRevision {
            revision: 1,
            bundle_id: "fleet-default/my-bundle".into(),
            deployment_id: "abc123".into(),
            manifest_yaml: "apiVersion: v1\nkind: ConfigMap\n".into(),
            values: serde_json::json!({"a": 1}),
            status: RevisionStatus::Deployed,
        };
        let encoded = SecretReleaseStore::encode(&revision).unwrap();
        let decoded = SecretReleaseStore::decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded.revision, revision.revision);
        assert_eq!(decoded.bundle_id, revision.bundle_id);
    }
}
