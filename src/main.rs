use std::sync::Arc;

use fleet_agent::cluster::KubeClusterApplier;
use fleet_agent::config::AgentConfig;
use fleet_agent::crd::print_crd_without_formats;
use fleet_agent::drift::DriftCorrector;
use fleet_agent::reconciler::{self, Ctx};
use fleet_agent::release::store::SecretReleaseStore;
use fleet_agent::release::ReleaseEngine;
use fleet_agent::render::TeraChartRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    if std::env::var("PRINT_CRD").is_ok() {
        print_crd_without_formats()?;
        return Ok(());
    }

    let config = AgentConfig::from_env();
    let client = kube::Client::try_default().await?;

    let store = Arc::new(SecretReleaseStore::new(client.clone()));
    let cluster = Arc::new(KubeClusterApplier::new(client.clone()).await?);
    let release_engine = Arc::new(ReleaseEngine::new(store, cluster.clone()));
    let drift = Arc::new(DriftCorrector::new(release_engine.clone()));

    let ctx = Arc::new(Ctx {
        client,
        release_engine,
        drift,
        cluster,
        renderer: Arc::new(TeraChartRenderer::default()),
        config,
    });

    reconciler::run(ctx).await
}
