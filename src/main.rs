use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mpi_provisioner::config::{ProvisionConfig, DEFAULT_LABEL_KEY, DEFAULT_NAMESPACE};
use mpi_provisioner::controller::teardown_workload;
use mpi_provisioner::scheduler::{
    CascadePolicy, DeleteOptions, KubeScheduler, MemberStatus, Scheduler,
};
use mpi_provisioner::shutdown::install_shutdown_handler;
use mpi_provisioner::template::TemplateRenderer;
use mpi_provisioner::{JobController, JobSpec, Provisioned, Teardown};

#[derive(Parser, Debug)]
#[command(name = "mpi-provisioner")]
#[command(version)]
#[command(about = "Provision MPI worker groups on Kubernetes and publish a hostfile")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Create the workload, wait until every member runs, write the hostfile
    Provision(ProvisionArgs),

    /// Delete a job's workload (succeeds if it is already gone)
    Teardown(TeardownArgs),

    /// Render the workload spec into the working directory without submitting it
    Render {
        #[command(flatten)]
        job: JobArgs,

        /// Workload template
        #[arg(long, default_value = "templates/mpi-node-base.yaml")]
        template: PathBuf,
    },

    /// Show the current member statuses for a label
    Status {
        /// Member label
        label: String,

        #[command(flatten)]
        cluster: ClusterArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct JobArgs {
    /// Job identifier (generated when omitted)
    #[arg(long)]
    job_id: Option<String>,

    /// Workload name and member label (default: mpi-<job-id>)
    #[arg(long)]
    label: Option<String>,

    /// Number of worker nodes
    #[arg(long, default_value = "1")]
    nodes: u32,

    /// GPUs per node
    #[arg(long, default_value = "0")]
    gpus: u32,

    /// MPI slots per node written to the hostfile
    #[arg(long, default_value = "1")]
    slots: u32,

    /// Job working directory, receives mpi-nodes.yaml and hostfile
    #[arg(long)]
    working_dir: PathBuf,
}

impl JobArgs {
    fn to_job(&self) -> JobSpec {
        let job_id = self
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());
        let mut job = JobSpec::new(job_id, &self.working_dir)
            .with_nodes(self.nodes)
            .with_gpus(self.gpus)
            .with_slots(self.slots);
        if let Some(label) = &self.label {
            job = job.with_label(label.clone());
        }
        job
    }
}

#[derive(Parser, Debug)]
struct ClusterArgs {
    /// Namespace workloads live in
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Label key members are selected by
    #[arg(long, default_value = DEFAULT_LABEL_KEY)]
    label_key: String,
}

impl ClusterArgs {
    async fn connect(&self) -> Result<Arc<dyn Scheduler>, Box<dyn std::error::Error>> {
        let scheduler = KubeScheduler::try_default(&self.namespace, &self.label_key).await?;
        Ok(Arc::new(scheduler))
    }
}

#[derive(Parser, Debug)]
struct ProvisionArgs {
    #[command(flatten)]
    job: JobArgs,

    #[command(flatten)]
    cluster: ClusterArgs,

    /// Workload template
    #[arg(long, default_value = "templates/mpi-node-base.yaml")]
    template: PathBuf,

    /// Give up waiting for readiness after this many seconds
    #[arg(long)]
    timeout_secs: u64,

    /// Delay between readiness polls in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct TeardownArgs {
    /// Job identifier
    #[arg(long)]
    job_id: String,

    /// Workload name (default: mpi-<job-id>)
    #[arg(long)]
    label: Option<String>,

    /// Seconds members get to exit cleanly
    #[arg(long, default_value = "5")]
    grace_period_secs: u64,

    #[command(flatten)]
    cluster: ClusterArgs,
}

impl TeardownArgs {
    fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| mpi_provisioner::job::label_for(&self.job_id))
    }

    fn delete_options(&self) -> DeleteOptions {
        DeleteOptions {
            grace_period: Duration::from_secs(self.grace_period_secs),
            cascade: CascadePolicy::Foreground,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct StatusOutput<'a> {
    label: &'a str,
    members: &'a [MemberStatus],
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn run_provision(args: ProvisionArgs) -> Result<(), Box<dyn std::error::Error>> {
    let job = args.job.to_job();
    let config = ProvisionConfig::new(&args.template, Duration::from_secs(args.timeout_secs))
        .with_namespace(&args.cluster.namespace)
        .with_label_key(&args.cluster.label_key)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms));

    let scheduler = args.cluster.connect().await?;
    let controller = JobController::new(scheduler, config);
    let cancel = install_shutdown_handler()?;

    match controller.provision(&job, &cancel).await {
        Ok(provisioned) => {
            print_provisioned(&provisioned, &args.output)?;
            Ok(())
        }
        Err(e) => {
            if let Some(snapshot) = e.snapshot() {
                for member in snapshot {
                    eprintln!("  last seen: {}", member);
                }
            }
            eprintln!(
                "Clean up with: mpi-provisioner teardown --job-id {} --label {}",
                job.job_id, job.label
            );
            Err(e.into())
        }
    }
}

fn print_provisioned(
    provisioned: &Provisioned,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(provisioned)?),
        OutputFormat::Table => {
            println!("Job {} ready ({})", provisioned.job_id, provisioned.label);
            println!("Hostfile:      {}", provisioned.hostfile.display());
            println!("Workload spec: {}", provisioned.workload_spec.display());
            println!(
                "Ready after {} polls, {}s",
                provisioned.rounds,
                (provisioned.finished_at - provisioned.started_at).num_seconds()
            );
            print_members(&provisioned.members);
        }
    }
    Ok(())
}

fn print_members(members: &[MemberStatus]) {
    println!("{:<40} {:<10} {:<16}", "MEMBER", "PHASE", "ADDRESS");
    println!("{}", "-".repeat(68));
    for member in members {
        println!(
            "{:<40} {:<10} {:<16}",
            member.name,
            member.phase.to_string(),
            member.address.as_deref().unwrap_or("-")
        );
    }
}

async fn run_teardown(args: TeardownArgs) -> Result<(), Box<dyn std::error::Error>> {
    let label = args.label();
    let scheduler = args.cluster.connect().await?;
    match teardown_workload(scheduler.as_ref(), &args.job_id, &label, args.delete_options()).await? {
        Teardown::Deleted => println!("Workload {} deleted", label),
        Teardown::AlreadyAbsent => println!("Workload {} was already gone", label),
    }
    Ok(())
}

fn run_render(job: &JobArgs, template: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let job = job.to_job();
    job.validate()?;
    let spec = TemplateRenderer::load(template)?.render_to_dir(&job)?;
    println!("{}", spec.path.display());
    Ok(())
}

async fn run_status(
    label: &str,
    cluster: &ClusterArgs,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = cluster.connect().await?;
    let members = scheduler.member_statuses(label).await?;
    match output {
        OutputFormat::Json => {
            let out = StatusOutput {
                label,
                members: &members,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            if members.is_empty() {
                println!("No members with label {}", label);
            } else {
                print_members(&members);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Provision(args) => run_provision(args).await,
        Commands::Teardown(args) => run_teardown(args).await,
        Commands::Render { job, template } => run_render(&job, &template),
        Commands::Status {
            label,
            cluster,
            output,
        } => run_status(&label, &cluster, &output).await,
    }
}
