//! C7 — Release Engine: install/upgrade/rollback/uninstall lifecycle,
//! persisted through the Secret-backed store (`release::store`) with
//! history bounding (`release::history`).
//!
//! Modeled the way headwind's `controller::helm` module wraps a Helm
//! action config behind a small struct owning a mutex-guarded handle:
//! here the handle is a `ClusterApplier` plus a `ReleaseStore`, and
//! instead of shelling out to a `helm` binary the release payload is
//! written straight to a `Secret` via the `kube::Client`.

pub mod history;
pub mod store;

use std::sync::Arc;

use indexmap::IndexMap;
use kube::api::DynamicObject;
use serde_json::Value;

use crate::cluster::ClusterApplier;
use crate::crd::DeploymentOptions;
use crate::error::{Error, ErrorAccumulator};
use crate::objectset::ObjectKey;
use crate::plan::Plan;
use store::{ReleaseKey, ReleaseRevision, ReleaseStore, RevisionStatus};

pub struct ReleaseEngine {
    store: Arc<dyn ReleaseStore>,
    applier: Arc<dyn ClusterApplier>,
}

/// Result of applying a plan to the cluster, independent of whether the
/// release bookkeeping that triggered it was install/upgrade/rollback.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub revision: u32,
    pub created: Vec<ObjectKey>,
    pub updated: Vec<ObjectKey>,
    pub deleted: Vec<ObjectKey>,
    /// Objects whose non-force update failed because a prior change
    /// touched something inside a list; these are not lumped in with
    /// `errors` because the caller reports them as the distinct
    /// `modified` condition rather than a reconcile failure.
    pub conflicted: Vec<ObjectKey>,
    pub errors: ErrorAccumulator,
}

impl ApplyOutcome {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.conflicted.is_empty()
    }
}

fn is_unprocessable(err: &Error) -> bool {
    matches!(err, Error::Kube(kube::Error::Api(resp)) if resp.code == 409 || resp.code == 422)
}

/// Which write method `apply_plan` uses for the Update set. Creates
/// always go through force apply regardless of mode — there's no prior
/// owner to conflict with on an object that doesn't exist yet.
#[derive(Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    /// Force server-side apply: install/upgrade, where this agent owns
    /// the objects outright.
    ForceApply,
    /// Non-forcing server-side apply: non-force rollback. Surfaces an
    /// ownership conflict (409/422) instead of silently overwriting a
    /// field another manager has taken, so an in-list mutation is
    /// reported as `conflicted` rather than corrected.
    MergeApply,
    /// PUT-style replace: force rollback.
    Replace,
}

impl ReleaseEngine {
    pub fn new(store: Arc<dyn ReleaseStore>, applier: Arc<dyn ClusterApplier>) -> Self {
        Self { store, applier }
    }

    /// Applies create/update/delete in that order so nothing is ever
    /// briefly orphaned, accumulating per-object failures rather than
    /// stopping at the first one. `mode` selects the write method used
    /// for the Update set.
    async fn apply_plan(
        &self,
        plan: &Plan,
        desired_objects: &IndexMap<ObjectKey, DynamicObject>,
        mode: UpdateMode,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for key in &plan.create {
            let Some(obj) = desired_objects.get(key) else { continue };
            match self.applier.apply(obj).await {
                Ok(_) => outcome.created.push(key.clone()),
                Err(e) => outcome.errors.push(e),
            }
        }

        for key in plan.update.keys() {
            let Some(obj) = desired_objects.get(key) else { continue };
            let result = match mode {
                UpdateMode::ForceApply => self.applier.apply(obj).await,
                UpdateMode::MergeApply => self.applier.apply_merge(obj).await,
                UpdateMode::Replace => self.applier.replace(obj).await,
            };
            match result {
                Ok(_) => outcome.updated.push(key.clone()),
                Err(e) if mode == UpdateMode::MergeApply && is_unprocessable(&e) => {
                    outcome.conflicted.push(key.clone());
                }
                Err(e) => outcome.errors.push(e),
            }
        }

        for key in &plan.delete {
            match self.applier.delete(key).await {
                Ok(_) => outcome.deleted.push(key.clone()),
                Err(e) => outcome.errors.push(e),
            }
        }

        outcome
    }

    /// First-ever install of a release: revision 1.
    pub async fn install(
        &self,
        key: &ReleaseKey,
        agent_namespace: &str,
        bundle_id: &str,
        deployment_id: &str,
        manifest_yaml: String,
        values: Value,
        plan: &Plan,
        desired_objects: &IndexMap<ObjectKey, DynamicObject>,
    ) -> Result<ApplyOutcome, Error> {
        let mut outcome = self.apply_plan(plan, desired_objects, UpdateMode::ForceApply).await;
        outcome.revision = 1;

        let status = if outcome.succeeded() { RevisionStatus::Deployed } else { RevisionStatus::Failed };
        self.store
            .save_revision(
                key,
                agent_namespace,
                ReleaseRevision {
                    revision: 1,
                    bundle_id: bundle_id.to_string(),
                    deployment_id: deployment_id.to_string(),
                    manifest_yaml,
                    values,
                    status,
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Upgrades an existing release: a new revision is appended, the
    /// prior `Deployed` revision is marked `Superseded`, and history is
    /// trimmed per `options.correct_drift.keep_fail_history` /
    /// `max_history` (see DESIGN.md's Open Question decisions).
    pub async fn upgrade(
        &self,
        key: &ReleaseKey,
        agent_namespace: &str,
        bundle_id: &str,
        deployment_id: &str,
        manifest_yaml: String,
        values: Value,
        plan: &Plan,
        desired_objects: &IndexMap<ObjectKey, DynamicObject>,
        options: &DeploymentOptions,
        default_max_history: usize,
    ) -> Result<ApplyOutcome, Error> {
        let mut revisions = self.store.list_revisions(key).await?;
        let next_revision = revisions.iter().map(|r| r.revision).max().unwrap_or(0) + 1;

        let mut outcome = self.apply_plan(plan, desired_objects, UpdateMode::ForceApply).await;
        outcome.revision = next_revision;

        for prior in revisions.iter_mut().filter(|r| r.status == RevisionStatus::Deployed) {
            prior.status = RevisionStatus::Superseded;
            self.store.save_revision(key, agent_namespace, prior.clone()).await?;
        }

        let status = if outcome.succeeded() { RevisionStatus::Deployed } else { RevisionStatus::Failed };
        let new_revision = ReleaseRevision {
            revision: next_revision,
            bundle_id: bundle_id.to_string(),
            deployment_id: deployment_id.to_string(),
            manifest_yaml,
            values,
            status,
        };
        self.store.save_revision(key, agent_namespace, new_revision.clone()).await?;
        revisions.push(new_revision);

        let max_history = options
            .helm
            .as_ref()
            .and_then(|h| h.max_history)
            .unwrap_or(default_max_history);
        let (_, dropped) = history::trim(revisions, max_history, options.correct_drift.keep_fail_history);
        for revision in dropped {
            self.store.delete_revision(key, revision).await?;
        }

        Ok(outcome)
    }

    /// Rolls back to a previously stored revision's rendered manifest.
    ///
    /// Non-force rollback applies via non-forcing server-side apply
    /// (`ClusterApplier::apply_merge`, no field-ownership override) and
    /// is known to fail when a prior change modified an item inside a
    /// list (e.g. a port entry in `spec.ports[]`): the out-of-band edit
    /// took ownership of that field under a different manager, the
    /// merge can't reconcile it without forcing, the API server rejects
    /// the patch with a conflict, and the affected objects land in
    /// `conflicted` rather than `errors` so the caller can surface the
    /// distinct `modified` condition instead of a bare reconcile
    /// failure.
    /// Force rollback instead does a PUT-style replace, which succeeds
    /// across in-list mutations but may trigger a delete-and-recreate
    /// for immutable fields — those failures are real errors, not
    /// `conflicted`, since replace has no partial-merge fallback left to
    /// retry.
    pub async fn rollback(
        &self,
        key: &ReleaseKey,
        agent_namespace: &str,
        target_revision: u32,
        force: bool,
        plan: &Plan,
        desired_objects: &IndexMap<ObjectKey, DynamicObject>,
    ) -> Result<ApplyOutcome, Error> {
        let revisions = self.store.list_revisions(key).await?;
        let target = revisions
            .iter()
            .find(|r| r.revision == target_revision)
            .ok_or_else(|| Error::Rollback(format!("{}/{}: no such revision {target_revision}", key.namespace, key.name)))?
            .clone();

        let next_revision = revisions.iter().map(|r| r.revision).max().unwrap_or(0) + 1;
        let mode = if force { UpdateMode::Replace } else { UpdateMode::MergeApply };
        let mut outcome = self.apply_plan(plan, desired_objects, mode).await;
        outcome.revision = next_revision;

        let status = if outcome.succeeded() { RevisionStatus::Deployed } else { RevisionStatus::Failed };
        self.store
            .save_revision(
                key,
                agent_namespace,
                ReleaseRevision {
                    revision: next_revision,
                    bundle_id: target.bundle_id,
                    deployment_id: target.deployment_id,
                    manifest_yaml: target.manifest_yaml,
                    values: target.values,
                    status,
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Deletes every live object the release owns (unless
    /// `keep_resources`) and clears its stored revision history.
    pub async fn uninstall(
        &self,
        key: &ReleaseKey,
        owned_objects: &[ObjectKey],
        keep_resources: bool,
    ) -> Result<ApplyOutcome, Error> {
        let mut outcome = ApplyOutcome::default();

        if !keep_resources {
            for object_key in owned_objects {
                match self.applier.delete(object_key).await {
                    Ok(_) => outcome.deleted.push(object_key.clone()),
                    Err(e) => outcome.errors.push(e),
                }
            }
        }

        for revision in self.store.list_revisions(key).await? {
            self.store.delete_revision(key, revision.revision).await?;
        }

        Ok(outcome)
    }

    /// Lists every release this agent owns.
    pub async fn list_deployments(&self, agent_namespace: &str) -> Result<Vec<ReleaseKey>, Error> {
        self.store.list_owned_by_agent(agent_namespace).await
    }

    /// Highest stored revision number, or `None` if the release has
    /// never been installed — the reconciler's install-vs-upgrade
    /// switch.
    pub async fn current_revision(&self, key: &ReleaseKey) -> Result<Option<u32>, Error> {
        Ok(self.store.list_revisions(key).await?.into_iter().map(|r| r.revision).max())
    }

    /// GVKs the most recently stored revision's rendered manifest
    /// mentions, used by the reconciler to widen the live-object
    /// enumeration beyond this reconcile's desired set so a kind that
    /// disappeared entirely from the manifest is still discovered as an
    /// orphan rather than silently left behind.
    pub async fn latest_revision_gvks(&self, key: &ReleaseKey) -> Result<Vec<kube::api::GroupVersionKind>, Error> {
        let revisions = self.store.list_revisions(key).await?;
        let Some(latest) = revisions.iter().max_by_key(|r| r.revision) else {
            return Ok(Vec::new());
        };
        let objects = objects_from_manifest_yaml(&latest.manifest_yaml)?;
        let mut gvks = Vec::new();
        for object_key in objects.keys() {
            let gvk = object_key.gvk();
            if !gvks.contains(&gvk) {
                gvks.push(gvk);
            }
        }
        Ok(gvks)
    }
}

/// Parses a stored revision's rendered manifest back into objects keyed
/// the way `ObjectSet`/`Plan` expect, for rollback's dry-run.
pub fn objects_from_manifest_yaml(manifest_yaml: &str) -> Result<IndexMap<ObjectKey, DynamicObject>, Error> {
    use kube::api::GroupVersionKind;
    use kube::ResourceExt;

    let parsed = crate::render::parse_yaml_documents(manifest_yaml).map_err(Error::Render)?;
    let mut out = IndexMap::new();
    for obj in parsed {
        let types = obj.types.clone().unwrap_or_default();
        let (group, version) = match types.api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), types.api_version.clone()),
        };
        let gvk = GroupVersionKind { group, version, kind: types.kind.clone() };
        let key = ObjectKey::from_gvk_and_object(&gvk, &obj);
        out.insert(key, obj);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        revisions: Mutex<Vec<ReleaseRevision>>,
    }

    #[async_trait]
    impl ReleaseStore for FakeStore {
        async fn list_revisions(&self, _key: &ReleaseKey) -> Result<Vec<ReleaseRevision>, Error> {
            Ok(self.revisions.lock().unwrap().clone())
        }

        async fn save_revision(&self, _key: &ReleaseKey, _agent_namespace: &str, revision: ReleaseRevision) -> Result<(), Error> {
            let mut revisions = self.revisions.lock().unwrap();
            revisions.retain(|r| r.revision != revision.revision);
            revisions.push(revision);
            Ok(())
        }

        async fn delete_revision(&self, _key: &ReleaseKey, revision: u32) -> Result<(), Error> {
            self.revisions.lock().unwrap().retain(|r| r.revision != revision);
            Ok(())
        }

        async fn list_owned_by_agent(&self, _agent_namespace: &str) -> Result<Vec<ReleaseKey>, Error> {
            Ok(Vec::new())
        }
    }

    struct FakeApplier;

    #[async_trait]
    impl ClusterApplier for FakeApplier {
        async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
            Ok(obj.clone())
        }
        async fn apply_merge(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
            Ok(obj.clone())
        }
        async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
            Ok(obj.clone())
        }
        async fn delete(&self, _key: &ObjectKey) -> Result<(), Error> {
            Ok(())
        }
        async fn get(&self, _key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
            Ok(None)
        }
        async fn list_owned(
            &self,
            _gvk: &kube::api::GroupVersionKind,
            _namespace: Option<&str>,
            _label_selector: &str,
        ) -> Result<Vec<DynamicObject>, Error> {
            Ok(Vec::new())
        }
    }

    fn key() -> ReleaseKey {
        ReleaseKey { namespace: "ns".into(), name: "demo".into() }
    }

    #[tokio::test]
    async fn install_persists_revision_one_as_deployed() {
        let engine = ReleaseEngine::new(Arc::new(FakeStore::default()), Arc::new(FakeApplier));
        let plan = Plan::default();
        let objects = IndexMap::new();
        let outcome = engine
            .install(&key(), "ns", "b", "d", "manifest".into(), Value::Null, &plan, &objects)
            .await
            .unwrap();
        assert_eq!(outcome.revision, 1);
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn upgrade_supersedes_prior_deployed_revision() {
        let store = Arc::new(FakeStore::default());
        let engine = ReleaseEngine::new(store.clone(), Arc::new(FakeApplier));
        let plan = Plan::default();
        let objects = IndexMap::new();

        engine
            .install(&key(), "ns", "b", "d1", "m1".into(), Value::Null, &plan, &objects)
            .await
            .unwrap();
        engine
            .upgrade(
                &key(),
                "ns",
                "b",
                "d2",
                "m2".into(),
                Value::Null,
                &plan,
                &objects,
                &DeploymentOptions::default(),
                10,
            )
            .await
            .unwrap();

        let revisions = store.revisions.lock().unwrap().clone();
        assert_eq!(revisions.len(), 2);
        let first = revisions.iter().find(|r| r.revision == 1).unwrap();
        assert_eq!(first.status, RevisionStatus::Superseded);
        let second = revisions.iter().find(|r| r.revision == 2).unwrap();
        assert_eq!(second.status, RevisionStatus::Deployed);
    }

    #[tokio::test]
    async fn rollback_to_missing_revision_errors() {
        let engine = ReleaseEngine::new(Arc::new(FakeStore::default()), Arc::new(FakeApplier));
        let plan = Plan::default();
        let objects = IndexMap::new();
        let result = engine.rollback(&key(), "ns", 5, false, &plan, &objects).await;
        assert!(matches!(result, Err(Error::Rollback(_))));
    }

    /// Simulates an object whose non-force server-side apply is rejected
    /// because a prior out-of-band edit took ownership of a field (the
    /// in-list mutation case scenario 4 covers); force replace on the
    /// same object always succeeds.
    struct ConflictingApplier;

    fn conflict_error() -> Error {
        Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "conflict".into(),
            reason: "Conflict".into(),
            code: 409,
        }))
    }

    #[async_trait]
    impl ClusterApplier for ConflictingApplier {
        async fn apply(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
            Ok(obj.clone())
        }
        async fn apply_merge(&self, _obj: &DynamicObject) -> Result<DynamicObject, Error> {
            Err(conflict_error())
        }
        async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
            Ok(obj.clone())
        }
        async fn delete(&self, _key: &ObjectKey) -> Result<(), Error> {
            Ok(())
        }
        async fn get(&self, _key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
            Ok(None)
        }
        async fn list_owned(
            &self,
            _gvk: &kube::api::GroupVersionKind,
            _namespace: Option<&str>,
            _label_selector: &str,
        ) -> Result<Vec<DynamicObject>, Error> {
            Ok(Vec::new())
        }
    }

    fn plan_with_one_update() -> (Plan, IndexMap<ObjectKey, DynamicObject>) {
        use kube::api::ApiResource;

        let object_key = ObjectKey {
            group: String::new(),
            version: "v1".into(),
            kind: "Service".into(),
            namespace: Some("ns".into()),
            name: "svc".into(),
        };
        let gvk = object_key.gvk();
        let ar = ApiResource::from_gvk(&gvk);
        let obj = DynamicObject::new(&object_key.name, &ar);

        let mut plan = Plan::default();
        plan.update.insert(object_key.clone(), Value::Null);
        let mut objects = IndexMap::new();
        objects.insert(object_key, obj);
        (plan, objects)
    }

    #[tokio::test]
    async fn non_force_rollback_reports_conflicted_on_ownership_conflict() {
        let engine = ReleaseEngine::new(Arc::new(FakeStore::default()), Arc::new(ConflictingApplier));
        let (plan, objects) = plan_with_one_update();

        engine
            .install(&key(), "ns", "b", "d1", "m1".into(), Value::Null, &Plan::default(), &IndexMap::new())
            .await
            .unwrap();

        let outcome = engine.rollback(&key(), "ns", 1, false, &plan, &objects).await.unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.conflicted.len(), 1);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn force_rollback_succeeds_despite_non_force_conflicts() {
        let engine = ReleaseEngine::new(Arc::new(FakeStore::default()), Arc::new(ConflictingApplier));
        let (plan, objects) = plan_with_one_update();

        engine
            .install(&key(), "ns", "b", "d1", "m1".into(), Value::Null, &Plan::default(), &IndexMap::new())
            .await
            .unwrap();

        let outcome = engine.rollback(&key(), "ns", 1, true, &plan, &objects).await.unwrap();
        assert!(outcome.succeeded());
        assert!(outcome.conflicted.is_empty());
    }
}
