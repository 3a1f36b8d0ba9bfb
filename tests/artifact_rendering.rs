//! Backend artifact rendering tests
//!
//! Run the real launchers against stub collaborators and inspect the
//! files they materialize: the batch script a Slurm admin would read,
//! and the manifest a cluster operator would apply.

use std::fs;
use std::path::Path;

use serde_json::Value;
use trainlane::backend::{
    BackendError, BackendJobStatus, BatchBackend, ClusterBackend, RegistryClient,
};
use trainlane::config::Recipe;
use trainlane::launcher::Artifact;
use trainlane::{
    resolve, JobSpec, KubernetesLauncher, Launcher, NodeCoordinator, SlurmLauncher, Stage,
    Topology, WorkloadShape,
};

struct StubBatch;

impl BatchBackend for StubBatch {
    fn submit(&self, _script_path: &Path) -> Result<String, BackendError> {
        Ok("1234".to_string())
    }
    fn query(&self, _job_id: &str) -> Result<BackendJobStatus, BackendError> {
        Ok(BackendJobStatus::Pending)
    }
    fn cancel(&self, _job_id: &str) -> Result<(), BackendError> {
        Ok(())
    }
    fn hostnames(&self, _partition: Option<&str>) -> Result<Vec<String>, BackendError> {
        Ok(vec!["gpu-02".to_string(), "gpu-01".to_string()])
    }
}

struct StubCluster;

impl ClusterBackend for StubCluster {
    fn apply(&self, manifest: &Value) -> Result<String, BackendError> {
        Ok(manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
    fn read_status(&self, _kind: &str, _name: &str) -> Result<Value, BackendError> {
        Ok(Value::Null)
    }
    fn delete(&self, _kind: &str, _name: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

struct StubRegistry;

impl RegistryClient for StubRegistry {
    fn login(&self, _image: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

fn spec() -> JobSpec {
    let base = Recipe {
        job_name: Some("llama-ft".to_string()),
        image: Some("registry.example.com/train/llama:v3".to_string()),
        entry_script: Some("finetune.py".to_string()),
        script_args: vec!["--epochs".to_string(), "3".to_string()],
        node_count: Some(2),
        tasks_per_node: Some(8),
        instance_type: Some("p5.48xlarge".to_string()),
        queue: Some("training".to_string()),
        max_retry: Some(1),
        ..Recipe::default()
    };
    resolve(base, Recipe::default(), Recipe::default()).unwrap()
}

fn compile_and_materialize(launcher: &dyn Launcher, dir: &Path) -> (Vec<Artifact>, Topology) {
    let plan = Stage::for_shape(WorkloadShape::NativeTraining)
        .compile(&spec())
        .unwrap();
    let nodes = launcher.discover_nodes(&plan).unwrap();
    let topology = NodeCoordinator::new().topology(&plan, &nodes).unwrap();
    let artifacts = launcher.materialize(&plan, &topology, dir).unwrap();
    (artifacts, topology)
}

#[test]
fn test_slurm_artifacts_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = SlurmLauncher::new(Box::new(StubBatch), Box::new(StubRegistry));

    let (artifacts, topology) = compile_and_materialize(&launcher, dir.path());

    // Discovery came back unsorted; ranks must not.
    assert_eq!(topology.nodes, vec!["gpu-01", "gpu-02"]);
    assert_eq!(topology.master(), "gpu-01");

    let batch = artifacts
        .iter()
        .find_map(|a| match a {
            Artifact::BatchScript(path) => Some(path),
            _ => None,
        })
        .unwrap();
    let script = fs::read_to_string(batch).unwrap();
    assert!(script.contains("#SBATCH --nodes=2"));
    assert!(script.contains("#SBATCH --partition=training"));
    assert!(script.contains("#SBATCH --exclusive"));

    let bootstrap = artifacts
        .iter()
        .find_map(|a| match a {
            Artifact::Bootstrap(path) => Some(path),
            _ => None,
        })
        .unwrap();
    let script = fs::read_to_string(bootstrap).unwrap();
    assert!(script.contains("torchrun"));
    assert!(script.contains("finetune.py --epochs 3"));
    assert!(script.contains("--master-port \"$MASTER_PORT\""));
    assert!(script.contains("MASTER_PORT=29500"));
}

#[test]
fn test_slurm_submit_uses_batch_script() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = SlurmLauncher::new(Box::new(StubBatch), Box::new(StubRegistry));

    let plan = Stage::for_shape(WorkloadShape::NativeTraining)
        .compile(&spec())
        .unwrap();
    let nodes = launcher.discover_nodes(&plan).unwrap();
    let topology = NodeCoordinator::new().topology(&plan, &nodes).unwrap();
    let artifacts = launcher.materialize(&plan, &topology, dir.path()).unwrap();

    assert_eq!(launcher.submit(&plan, &artifacts).unwrap(), "1234");
    // Artifacts alone are not enough without the batch script.
    assert!(launcher.submit(&plan, &[]).is_err());
}

#[test]
fn test_kubernetes_manifest_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = KubernetesLauncher::new(Box::new(StubCluster), Box::new(StubRegistry));

    let plan = Stage::for_shape(WorkloadShape::NativeTraining)
        .compile(&spec())
        .unwrap();
    let nodes = launcher.discover_nodes(&plan).unwrap();
    let topology = NodeCoordinator::new().topology(&plan, &nodes).unwrap();
    let artifacts = launcher.materialize(&plan, &topology, dir.path()).unwrap();

    // Predicted pod names double as the topology.
    assert_eq!(topology.world_size(), 2);
    assert!(topology.master().ends_with("-worker-0"));

    let manifest_path = artifacts
        .iter()
        .find_map(|a| match a {
            Artifact::Manifest(path) => Some(path),
            _ => None,
        })
        .unwrap();
    let manifest: Value =
        serde_json::from_str(&fs::read_to_string(manifest_path).unwrap()).unwrap();

    assert_eq!(manifest.pointer("/kind").unwrap(), "PyTorchJob");
    assert_eq!(
        manifest
            .pointer("/spec/pytorchReplicaSpecs/Worker/replicas")
            .unwrap(),
        2
    );
    assert_eq!(
        manifest
            .pointer(
                "/spec/pytorchReplicaSpecs/Worker/template/spec/containers/0/resources/limits/nvidia.com~1gpu"
            )
            .unwrap(),
        8
    );

    // The manifest name matches what the cluster will report back.
    let name = manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap();
    assert_eq!(launcher.submit(&plan, &artifacts).unwrap(), name);
}

#[test]
fn test_same_spec_same_job_key() {
    // The job key is content-addressed, so rendering twice from the same
    // resolved spec targets the same backend resource name.
    let key1 = spec().job_key().unwrap();
    let key2 = spec().job_key().unwrap();
    assert_eq!(key1, key2);
    assert_eq!(key1.len(), 64);
}
