//! Trainlane CLI
//!
//! Entry point for the `trainlane` command-line tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

use trainlane::backend::{CliRegistryClient, Kubectl, SlurmCli};
use trainlane::config::Recipe;
use trainlane::{
    resolve, JobSpec, KubernetesLauncher, LaunchError, Launcher, NodeCoordinator, Orchestrator,
    SlurmLauncher, Stage, WorkloadShape,
};

#[derive(Parser)]
#[command(name = "trainlane")]
#[command(about = "Distributed training launch orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Slurm,
    Kubernetes,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Base recipe file (TOML)
    #[arg(long)]
    base: PathBuf,

    /// Cluster-type overlay file (TOML)
    #[arg(long)]
    cluster: Option<PathBuf>,

    /// User overlay file (TOML)
    #[arg(long)]
    user: Option<PathBuf>,

    /// Workload shape: native, gpu-recipe, trainium-recipe, custom
    #[arg(long, default_value = "native")]
    shape: String,
}

#[derive(clap::Args)]
struct BackendArgs {
    /// Execution backend
    #[arg(long, value_enum, default_value_t = BackendArg::Slurm)]
    backend: BackendArg,

    /// Kubernetes namespace (kubernetes backend only)
    #[arg(long)]
    namespace: Option<String>,

    /// Directory for submission records
    #[arg(long, default_value = ".trainlane/state")]
    state_dir: PathBuf,

    /// Directory for materialized launch artifacts
    #[arg(long, default_value = ".trainlane/artifacts")]
    artifact_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve config and print the compiled launch plan without submitting
    Plan {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Submit a job and drive it to completion
    Submit {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Re-attach to an existing submission and continue driving it
    Resume {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Poll a job once and print its submission record
    Status {
        /// Job name
        job: String,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Cancel a job
    Cancel {
        /// Job name
        job: String,

        #[command(flatten)]
        backend: BackendArgs,
    },
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainlane=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_layer(path: Option<&PathBuf>) -> Result<Recipe, LaunchError> {
    match path {
        Some(path) => Ok(Recipe::from_toml_file(path)?),
        None => Ok(Recipe::default()),
    }
}

fn resolve_spec(config: &ConfigArgs) -> Result<(JobSpec, WorkloadShape), LaunchError> {
    let base = Recipe::from_toml_file(&config.base)?;
    let cluster = load_layer(config.cluster.as_ref())?;
    let user = load_layer(config.user.as_ref())?;
    let spec = resolve(base, cluster, user)?;

    let shape: WorkloadShape = config.shape.parse().map_err(|message: String| {
        LaunchError::Config(trainlane::ConfigError::Parse {
            path: "--shape".to_string(),
            message,
        })
    })?;
    Ok((spec, shape))
}

fn build_launcher(args: &BackendArgs) -> Box<dyn Launcher> {
    match args.backend {
        BackendArg::Slurm => Box::new(SlurmLauncher::new(
            Box::new(SlurmCli::new()),
            Box::new(CliRegistryClient::new()),
        )),
        BackendArg::Kubernetes => Box::new(KubernetesLauncher::new(
            Box::new(Kubectl::new(args.namespace.clone())),
            Box::new(CliRegistryClient::new()),
        )),
    }
}

fn build_orchestrator(args: &BackendArgs) -> Orchestrator {
    Orchestrator::new(
        build_launcher(args),
        args.state_dir.clone(),
        args.artifact_dir.clone(),
    )
}

fn run_plan(config: ConfigArgs) -> Result<(), LaunchError> {
    let (spec, shape) = resolve_spec(&config)?;
    let plan = Stage::for_shape(shape).compile(&spec)?;

    // Preview the rank assignment with synthetic node names; real node
    // identities only exist after discovery.
    let synthetic: Vec<String> = (0..plan.node_count).map(|i| format!("node-{i}")).collect();
    let topology = NodeCoordinator::new().topology(&plan, &synthetic)?;

    println!(
        "{}",
        serde_json::json!({
            "job_key": spec.job_key()?,
            "plan": plan,
            "topology_preview": topology,
        })
    );
    Ok(())
}

fn print_record(record: &trainlane::SubmissionRecord) -> Result<(), LaunchError> {
    let json = record
        .to_json()
        .map_err(trainlane::submission::StateError::from)?;
    println!("{json}");
    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan { config } => run_plan(config),
        Commands::Submit { config, backend } => resolve_spec(&config).and_then(|(spec, shape)| {
            let record = build_orchestrator(&backend).launch(&spec, shape)?;
            print_record(&record)
        }),
        Commands::Resume { config, backend } => resolve_spec(&config).and_then(|(spec, shape)| {
            let record = build_orchestrator(&backend).resume(&spec, shape)?;
            print_record(&record)
        }),
        Commands::Status { job, backend } => build_orchestrator(&backend)
            .status(&job)
            .and_then(|record| print_record(&record)),
        Commands::Cancel { job, backend } => build_orchestrator(&backend)
            .cancel(&job)
            .and_then(|record| print_record(&record)),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        process::exit(err.exit_code());
    }
}
