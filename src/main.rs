//! # Config Rollout Controller
//!
//! A Kubernetes controller that rolls workloads when their configuration changes.
//!
//! ## Overview
//!
//! Kubernetes does not restart pods when a mounted ConfigMap or Secret
//! changes. This controller:
//!
//! 1. **Watches workloads** - Deployments, DaemonSets and StatefulSets that opt in
//!    with `config-rollout.io/update-on-config-change: "true"`
//! 2. **Takes ownership** - Adds a non-controlling owner reference to every
//!    ConfigMap and Secret the pod template references
//! 3. **Fingerprints content** - SHA-256 over the referenced data
//! 4. **Triggers rollouts** - Writes the fingerprint to the pod template
//!    annotation `config-rollout.io/config-hash` whenever it changes
//!
//! ## Features
//!
//! - **Volumes, projected volumes, envFrom and env key refs** are all followed
//! - **All-or-nothing**: a missing ConfigMap or Secret aborts the pass before any write
//! - **Optimistic concurrency**: every write carries the resource version it was based on
//! - **Prometheus metrics** and **health probes** on `METRICS_PORT`

use anyhow::Result;
use config_rollout_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await
}
