//! # CRD Generator
//!
//! Generates the `GitOpsDeploymentManagedEnvironment` CustomResourceDefinition YAML.
//!
//! ## Usage
//!
//! ```bash
//! # Print to stdout and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//!
//! # Write to a file
//! cargo run --bin crdgen -- --output config/crd/gitopsdeploymentmanagedenvironment.yaml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use kube::core::CustomResourceExt;
use managed_environment_controller::crd::GitOpsDeploymentManagedEnvironment;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crdgen", about = "Generate the managed environment CRD")]
struct Args {
    /// Write the CRD to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let yaml = serde_yaml::to_string(&GitOpsDeploymentManagedEnvironment::crd())
        .context("Failed to serialize CRD")?;

    match args.output {
        Some(path) => std::fs::write(&path, yaml)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{yaml}"),
    }
    Ok(())
}
