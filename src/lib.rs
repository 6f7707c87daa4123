//! Fleet BundleDeployment agent: renders a bundle, installs/upgrades it
//! through a Helm-style release engine, diffs the live cluster against
//! desired state, and corrects drift per the options on each
//! `BundleDeployment`.

pub mod cluster;
pub mod config;
pub mod crd;
pub mod diff;
pub mod drift;
pub mod error;
pub mod normalize;
pub mod objectset;
pub mod plan;
pub mod reconciler;
pub mod release;
pub mod render;
pub mod stamp;
