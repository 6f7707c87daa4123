//! C9 — BundleDeployment Reconciler: orchestrates C1..C8, maintaining
//! status and conditions. Drives the render → stamp → diff → plan →
//! release → drift pipeline for each BundleDeployment on every
//! reconcile.

pub mod readiness;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, warn};

use crate::cluster::ClusterApplier;
use crate::config::AgentConfig;
use crate::crd::{BundleDeployment, BundleDeploymentStatus};
use crate::drift::DriftCorrector;
use crate::error::Error;
use crate::objectset::{gvk_of, ObjectKey, ObjectSet};
use crate::plan::{self, HpaTarget};
use crate::release::store::ReleaseKey;
use crate::release::ReleaseEngine;
use crate::render::{self, ChartRenderer};
use crate::stamp::{self, SetIdentity};
use crate::drift::DriftOutcome;

pub const FINALIZER: &str = "fleet.cattle.io/bundledeployment-agent";

pub struct Ctx {
    pub client: Client,
    pub release_engine: Arc<ReleaseEngine>,
    pub drift: Arc<DriftCorrector>,
    pub cluster: Arc<dyn ClusterApplier>,
    pub renderer: Arc<dyn ChartRenderer + Send + Sync>,
    pub config: AgentConfig,
}

/// Runs both worker pools: the BundleDeployment controller that
/// installs/upgrades and the drift controller that re-checks converged
/// releases, sized independently via `AgentConfig`.
pub async fn run(ctx: Arc<Ctx>) -> anyhow::Result<()> {
    let bundles: Api<BundleDeployment> = Api::all(ctx.client.clone());
    let drift_bundles: Api<BundleDeployment> = Api::all(ctx.client.clone());

    let apply_loop = Controller::new(bundles, WatcherConfig::default())
        .concurrency(ctx.config.bundle_deployment_workers as u16)
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, _action)) => info!(name = %obj_ref.name, "reconciled"),
                Err(e) => error!(error = %e, "reconcile failed"),
            }
        });

    let drift_loop = Controller::new(drift_bundles, WatcherConfig::default())
        .concurrency(ctx.config.drift_workers as u16)
        .run(reconcile_drift, error_policy, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, _action)) => info!(name = %obj_ref.name, "drift checked"),
                Err(e) => error!(error = %e, "drift check failed"),
            }
        });

    tokio::join!(apply_loop, drift_loop);
    Ok(())
}

fn release_key(obj: &BundleDeployment, ns: &str) -> ReleaseKey {
    ReleaseKey { namespace: ns.to_string(), name: obj.spec.id.clone() }
}

/// Renders and stamps the desired object set for `obj`, per C1 + C2.
fn desired_object_set(obj: &BundleDeployment, ns: &str, renderer: &dyn ChartRenderer) -> Result<ObjectSet, Error> {
    let rendered = render::render(&obj.spec.manifest, &obj.spec.options, renderer)?;
    let identity = SetIdentity {
        bundle_id: obj.spec.id.clone(),
        label_prefix: String::new(),
        label_suffix: String::new(),
        owner_name: obj.name_any(),
        owner_namespace: ns.to_string(),
    };

    let mut desired = ObjectSet::new();
    for mut object in rendered {
        stamp::stamp(&mut object, &identity);
        let gvk = gvk_of(&object);
        desired.add(gvk, object);
    }
    Ok(desired)
}

/// Enumerates every live object carrying this bundle's set-id via
/// label selector, across every GVK the current desired set mentions
/// plus every GVK the
/// last-stored release revision mentioned — the latter catches a kind
/// that disappeared entirely from a new render, which a desired-keyed
/// lookup alone would never surface as an orphan.
async fn fetch_live(
    cluster: &dyn ClusterApplier,
    desired: &ObjectSet,
    bundle_id: &str,
    extra_gvks: &[kube::api::GroupVersionKind],
) -> Result<ObjectSet, Error> {
    let selector = stamp::owned_label_selector(bundle_id);
    let mut seen = std::collections::HashSet::new();
    let mut live = ObjectSet::new();

    for gvk in desired.objects_by_gvk().map(|(gvk, _)| gvk).chain(extra_gvks.iter().cloned()) {
        if !seen.insert((gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())) {
            continue;
        }
        for obj in cluster.list_owned(&gvk, None, &selector).await? {
            live.add(gvk.clone(), obj);
        }
    }
    Ok(live)
}

const HPA_VERSIONS: [&str; 2] = ["v1", "v2"];

/// Lists live HorizontalPodAutoscalers (both `autoscaling/v1` and
/// `autoscaling/v2`) in every namespace the bundle's live objects occupy
/// and resolves each one's `scaleTargetRef` against `live` so §4.6's
/// replicas normalization has the governing HPA's min/max alongside the
/// target's actual live replica count. HPAs aren't necessarily stamped
/// with our set-id, so they're listed unfiltered rather than via the
/// ownership label selector `fetch_live` uses.
async fn fetch_hpas(cluster: &dyn ClusterApplier, live: &ObjectSet) -> Result<Vec<HpaTarget>, Error> {
    let mut namespaces = std::collections::HashSet::new();
    for (_, bucket) in live.objects_by_gvk() {
        for key in bucket.keys() {
            if let Some(ns) = &key.namespace {
                namespaces.insert(ns.clone());
            }
        }
    }

    let mut hpas = Vec::new();
    for ns in &namespaces {
        for version in HPA_VERSIONS {
            let gvk = kube::api::GroupVersionKind {
                group: "autoscaling".to_string(),
                version: version.to_string(),
                kind: "HorizontalPodAutoscaler".to_string(),
            };
            for obj in cluster.list_owned(&gvk, Some(ns), "").await? {
                if let Some(target) = hpa_target(&obj, ns, live) {
                    hpas.push(target);
                }
            }
        }
    }
    Ok(hpas)
}

/// Parses one live HPA's `spec.scaleTargetRef`/`minReplicas`/
/// `maxReplicas` and pairs it with the target's actual live
/// `spec.replicas`, looked up from `live`. Returns `None` for a
/// malformed or unresolvable HPA rather than erroring the whole
/// reconcile over one bad object.
fn hpa_target(hpa: &kube::api::DynamicObject, namespace: &str, live: &ObjectSet) -> Option<HpaTarget> {
    let spec = hpa.data.get("spec")?;
    let target_ref = spec.get("scaleTargetRef")?;
    let target_api_version = target_ref.get("apiVersion")?.as_str()?.to_string();
    let target_kind = target_ref.get("kind")?.as_str()?.to_string();
    let target_name = target_ref.get("name")?.as_str()?.to_string();
    let max_replicas = spec.get("maxReplicas")?.as_i64()? as i32;
    let min_replicas = spec.get("minReplicas").and_then(|v| v.as_i64()).unwrap_or(1) as i32;

    let (group, version) = match target_api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), target_api_version.clone()),
    };
    let target_gvk = kube::api::GroupVersionKind { group, version, kind: target_kind.clone() };
    let target_key = ObjectKey {
        group: target_gvk.group.clone(),
        version: target_gvk.version.clone(),
        kind: target_gvk.kind.clone(),
        namespace: Some(namespace.to_string()),
        name: target_name.clone(),
    };
    let live_replicas = live.get(&target_gvk, &target_key)?.data.get("spec")?.get("replicas")?.as_i64()? as i32;

    Some(HpaTarget {
        namespace: namespace.to_string(),
        target_api_version,
        target_kind,
        target_name,
        min_replicas,
        max_replicas,
        live_replicas,
    })
}

async fn reconcile(obj: Arc<BundleDeployment>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let ns = obj.namespace().unwrap_or_else(|| ctx.config.agent_namespace.clone());
    let name = obj.name_any();
    let key = release_key(&obj, &ns);

    if obj.meta().deletion_timestamp.is_some() {
        let desired = desired_object_set(&obj, &ns, ctx.renderer.as_ref())?;
        let keys: Vec<ObjectKey> = desired.flatten().into_keys().collect();
        ctx.release_engine.uninstall(&key, &keys, obj.spec.keep_resources).await?;
        ensure_finalizer(&ctx.client, &ns, &name, false).await?;
        return Ok(Action::await_change());
    }

    ensure_finalizer(&ctx.client, &ns, &name, true).await?;

    let desired = desired_object_set(&obj, &ns, ctx.renderer.as_ref())?;
    let extra_gvks = ctx.release_engine.latest_revision_gvks(&key).await?;
    let live = fetch_live(ctx.cluster.as_ref(), &desired, &obj.spec.id, &extra_gvks).await?;
    let hpas = fetch_hpas(ctx.cluster.as_ref(), &live).await?;
    let default_namespace = obj
        .spec
        .options
        .default_namespace
        .clone()
        .unwrap_or_else(|| ns.clone());

    let plan = plan::dry_run(&desired, &live, &hpas, &obj.spec.options, &default_namespace);

    let previously_applied = obj
        .status
        .as_ref()
        .and_then(|s| s.applied_deployment_id.clone());
    let already_applied = previously_applied.as_deref() == Some(obj.spec.deployment_id.as_str());

    let mut applied_deployment_id = previously_applied;
    let mut rollback_message = None;

    if !already_applied {
        let desired_objects = desired.flatten();
        let manifest_yaml = render::to_yaml_documents(desired_objects.values());
        let current = ctx.release_engine.current_revision(&key).await?;
        let outcome = match current {
            None => {
                ctx.release_engine
                    .install(
                        &key,
                        &ctx.config.agent_namespace,
                        &obj.spec.id,
                        &obj.spec.deployment_id,
                        manifest_yaml,
                        obj.spec.manifest.values.clone(),
                        &plan,
                        &desired_objects,
                    )
                    .await?
            }
            Some(_) => {
                ctx.release_engine
                    .upgrade(
                        &key,
                        &ctx.config.agent_namespace,
                        &obj.spec.id,
                        &obj.spec.deployment_id,
                        manifest_yaml,
                        obj.spec.manifest.values.clone(),
                        &plan,
                        &desired_objects,
                        &obj.spec.options,
                        ctx.config.default_max_history,
                    )
                    .await?
            }
        };
        if outcome.succeeded() {
            applied_deployment_id = Some(obj.spec.deployment_id.clone());
        } else {
            warn!(bundle = %name, "install/upgrade did not fully succeed");
        }
    } else if !plan.is_empty() {
        let target_revision = ctx.release_engine.current_revision(&key).await?.unwrap_or(1);
        match ctx
            .drift
            .check(
                &key,
                &ctx.config.agent_namespace,
                obj.spec.options.correct_drift,
                &desired,
                &live,
                &hpas,
                &obj.spec.options,
                &default_namespace,
                target_revision,
            )
            .await?
        {
            DriftOutcome::RollbackFailed(message) => rollback_message = Some(message),
            _ => {}
        }
    }

    let (non_ready, counts) = status::readiness_status(&plan);
    let modified_rows = status::modified_status(&plan);
    let ready = plan.is_empty() && non_ready.is_empty() && rollback_message.is_none();

    let new_status = BundleDeploymentStatus {
        ready,
        non_modified: plan.update.is_empty() && plan.create.is_empty() && plan.delete.is_empty(),
        applied_deployment_id,
        release: Some(format!("{}/{}", key.namespace, key.name)),
        modified_status: modified_rows,
        non_ready_status: non_ready,
        display: status::display(ready, plan.is_empty(), rollback_message.as_deref()),
        resource_counts: counts,
        conditions: obj
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default(),
    };

    patch_status(&ctx.client, &ns, &name, &new_status).await?;

    Ok(Action::requeue(ctx.config.poll_interval))
}

/// The drift worker pool's reconcile: re-checks already-applied
/// releases on a fixed cadence, independent of spec-generation churn.
async fn reconcile_drift(obj: Arc<BundleDeployment>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    if obj.meta().deletion_timestamp.is_some() || !obj.spec.options.correct_drift.enabled {
        return Ok(Action::requeue(ctx.config.poll_interval));
    }

    let ns = obj.namespace().unwrap_or_else(|| ctx.config.agent_namespace.clone());
    let name = obj.name_any();
    let key = release_key(&obj, &ns);

    let already_applied = obj
        .status
        .as_ref()
        .and_then(|s| s.applied_deployment_id.as_deref())
        == Some(obj.spec.deployment_id.as_str());
    if !already_applied {
        return Ok(Action::requeue(ctx.config.poll_interval));
    }

    let desired = desired_object_set(&obj, &ns, ctx.renderer.as_ref())?;
    let extra_gvks = ctx.release_engine.latest_revision_gvks(&key).await?;
    let live = fetch_live(ctx.cluster.as_ref(), &desired, &obj.spec.id, &extra_gvks).await?;
    let hpas = fetch_hpas(ctx.cluster.as_ref(), &live).await?;
    let default_namespace = obj
        .spec
        .options
        .default_namespace
        .clone()
        .unwrap_or_else(|| ns.clone());

    let target_revision = ctx.release_engine.current_revision(&key).await?.unwrap_or(1);
    let outcome = ctx
        .drift
        .check(
            &key,
            &ctx.config.agent_namespace,
            obj.spec.options.correct_drift,
            &desired,
            &live,
            &hpas,
            &obj.spec.options,
            &default_namespace,
            target_revision,
        )
        .await?;

    if let DriftOutcome::RollbackFailed(message) = outcome {
        let mut status = obj.status.clone().unwrap_or_default();
        status.display = status::display(false, false, Some(&message));
        patch_status(&ctx.client, &ns, &name, &status).await?;
    }

    Ok(Action::requeue(ctx.config.poll_interval))
}

fn error_policy(_obj: Arc<BundleDeployment>, err: &Error, _ctx: Arc<Ctx>) -> Action {
    error!(error = %err, "reconcile error");
    Action::requeue(Duration::from_secs(10))
}

async fn ensure_finalizer(client: &Client, ns: &str, name: &str, present: bool) -> Result<(), Error> {
    let api: Api<BundleDeployment> = Api::namespaced(client.clone(), ns);
    let finalizers: Vec<&str> = if present { vec![FINALIZER] } else { vec![] };
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers }});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn patch_status(client: &Client, ns: &str, name: &str, status: &BundleDeploymentStatus) -> Result<(), Error> {
    let api: Api<BundleDeployment> = Api::namespaced(client.clone(), ns);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

    fn deployment(ns: &str, name: &str, replicas: i64) -> ObjectSet {
        let gvk = GroupVersionKind { group: "apps".into(), version: "v1".into(), kind: "Deployment".into() };
        let ar = ApiResource::from_gvk(&gvk);
        let mut obj = DynamicObject::new(name, &ar);
        obj.metadata.namespace = Some(ns.to_string());
        obj.data = serde_json::json!({"spec": {"replicas": replicas}});
        let mut set = ObjectSet::new();
        set.add(gvk, obj);
        set
    }

    fn hpa(ns: &str, target_name: &str, min: i64, max: i64) -> DynamicObject {
        let gvk = GroupVersionKind { group: "autoscaling".into(), version: "v2".into(), kind: "HorizontalPodAutoscaler".into() };
        let ar = ApiResource::from_gvk(&gvk);
        let mut obj = DynamicObject::new("web-hpa", &ar);
        obj.metadata.namespace = Some(ns.to_string());
        obj.data = serde_json::json!({
            "spec": {
                "scaleTargetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": target_name},
                "minReplicas": min,
                "maxReplicas": max,
            }
        });
        obj
    }

    #[test]
    fn hpa_target_resolves_live_replicas_from_live_set() {
        let live = deployment("ns", "web", 3);
        let target = hpa_target(&hpa("ns", "web", 2, 5), "ns", &live).expect("should resolve");
        assert_eq!(target.min_replicas, 2);
        assert_eq!(target.max_replicas, 5);
        assert_eq!(target.live_replicas, 3);
        assert_eq!(target.target_kind, "Deployment");
        assert_eq!(target.target_api_version, "apps/v1");
    }

    #[test]
    fn hpa_target_missing_target_in_live_set_is_none() {
        let live = ObjectSet::new();
        assert!(hpa_target(&hpa("ns", "web", 2, 5), "ns", &live).is_none());
    }

    #[test]
    fn hpa_target_defaults_min_replicas_to_one() {
        let gvk = GroupVersionKind { group: "autoscaling".into(), version: "v2".into(), kind: "HorizontalPodAutoscaler".into() };
        let ar = ApiResource::from_gvk(&gvk);
        let mut obj = DynamicObject::new("web-hpa", &ar);
        obj.metadata.namespace = Some("ns".to_string());
        obj.data = serde_json::json!({
            "spec": {
                "scaleTargetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web"},
                "maxReplicas": 5,
            }
        });

        let live = deployment("ns", "web", 1);
        let target = hpa_target(&obj, "ns", &live).expect("should resolve");
        assert_eq!(target.min_replicas, 1);
    }
}
