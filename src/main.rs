//! # Managed Environment Controller
//!
//! Kubernetes controller that registers remote clusters described by
//! `GitOpsDeploymentManagedEnvironment` resources with Argo CD.
//!
//! ## Overview
//!
//! For each managed environment the controller:
//! 1. Reads the kubeconfig from the referenced Secret
//! 2. Optionally provisions a dedicated service account on the target cluster
//! 3. Verifies the credentials can reach the target API server
//! 4. Writes an Argo CD cluster Secret for the environment
//! 5. Reports the outcome through the `ErrorOccurred` condition
//!
//! Deleting the resource removes the cluster Secret and its identity mapping.

use anyhow::Result;
use managed_environment_controller::runtime::{initialization, watch_loop};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialization::initialize().await?;
    let cancellations = init.reconciler.cancellations.clone();

    let result = watch_loop::run_watch_loop(init.envs, init.reconciler, init.server_state).await;

    let in_flight = cancellations.in_flight();
    if in_flight > 0 {
        info!(in_flight, "Cancelling in-flight reconciliations");
    }
    cancellations.cancel_all();

    result
}
