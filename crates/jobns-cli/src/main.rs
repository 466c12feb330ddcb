//! jobns CLI - Operator front-end for the job namespace hooks

use clap::{Args, Parser, Subcommand};
use jobns_core::cleanup::CleanupOutcome;
use jobns_core::{AdoptionPolicy, JobnsConfig, Lifecycle, SessionOutcome, TmpDirectorySet};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
#[command(name = "jobns")]
#[command(author, version, about = "Per-job private temporary directories via mount namespaces")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Options taking precedence over the `JOBNS_*` environment
#[derive(Args)]
struct ConfigOverrides {
    /// Comma-separated shared temporary roots (defaults to JOBNS_TMP_DIRS)
    #[arg(long, global = true)]
    tmp_dirs: Option<String>,

    /// Private subdirectory created under each root (defaults to JOBNS_TMP_SUBDIR or .jobns)
    #[arg(long, global = true)]
    tmp_subdir: Option<String>,

    /// Step daemon socket directory (defaults to JOBNS_STEPD_DIR or /run/jobns/stepd)
    #[arg(long, global = true)]
    stepd_dir: Option<PathBuf>,

    /// Node name (defaults to JOBNS_NODE_NAME or the short hostname)
    #[arg(long, global = true)]
    node_name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Make the shared roots private and create their subdirectories
    Prepare,

    /// Isolate a job's temporary directories, then run a command inside
    Isolate {
        /// Job owner uid
        #[arg(long)]
        uid: u32,

        /// Job owner gid
        #[arg(long)]
        gid: u32,

        /// Job id
        #[arg(long)]
        job: u32,

        /// Command to run in the isolated namespace
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Remove a job's private trees if its last step is terminating
    Cleanup {
        /// Job id
        #[arg(long)]
        job: u32,
    },

    /// Move a session into its job's namespace, then run a command
    Adopt {
        /// Process opening the session
        #[arg(long)]
        pid: u32,

        /// Session user, used when the process belongs to no job
        #[arg(long)]
        user: Option<String>,

        /// Refuse the session if it cannot be adopted
        #[arg(long)]
        fail_closed: bool,

        /// Command to run (defaults to $SHELL or /bin/sh)
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// List registered steps on this node
    Steps {
        /// Only steps of this job
        #[arg(long)]
        job: Option<u32>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn load_config(overrides: ConfigOverrides) -> jobns_core::Result<JobnsConfig> {
    let mut config = JobnsConfig::from_env()?;

    if overrides.tmp_dirs.is_some() || overrides.tmp_subdir.is_some() {
        let dirs = overrides.tmp_dirs.unwrap_or_else(|| {
            config
                .tmp_dirs
                .roots
                .iter()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(",")
        });
        let subdir = overrides
            .tmp_subdir
            .unwrap_or_else(|| config.tmp_dirs.subdir.clone());
        config.tmp_dirs = TmpDirectorySet::parse(&dirs, &subdir)?;
    }
    if let Some(dir) = overrides.stepd_dir {
        config.stepd_dir = dir;
    }
    if let Some(name) = overrides.node_name {
        config.node_name = Some(name);
    }

    Ok(config)
}

/// Replace this process with `command`; only returns on failure
fn exec(command: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let Some((program, args)) = command.split_first() else {
        return Err("no command given".into());
    };
    let err = Command::new(program).args(args).exec();
    Err(format!("failed to execute {program}: {err}").into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jobns=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.overrides)?;

    match cli.command {
        Commands::Prepare => {
            Lifecycle::new(config).prepare_node()?;
        }

        Commands::Isolate {
            uid,
            gid,
            job,
            command,
        } => {
            let private = Lifecycle::new(config).on_job_first_process_start(uid, gid, job)?;
            for dir in &private {
                tracing::debug!(root = ?dir.root, path = ?dir.path, "private directory");
            }
            exec(&command)?;
        }

        Commands::Cleanup { job } => match Lifecycle::new(config).on_step_terminate(job)? {
            CleanupOutcome::Disabled => println!("no temporary directories configured"),
            CleanupOutcome::JobGone => println!("job {job} has no registered steps"),
            CleanupOutcome::StepsRemaining(n) => {
                println!("job {job} still has {n} steps, nothing removed");
            }
            CleanupOutcome::Cleaned(report) => {
                println!("job {job}: {} bytes reclaimed", report.bytes());
                for failure in report.failures() {
                    if let Some(error) = &failure.error {
                        eprintln!("{}: {error}", failure.path.display());
                    }
                }
                if !report.is_complete() {
                    std::process::exit(1);
                }
            }
        },

        Commands::Adopt {
            pid,
            user,
            fail_closed,
            command,
        } => {
            if fail_closed {
                config.adoption_policy = AdoptionPolicy::FailClosed;
            }
            let outcome = Lifecycle::new(config).on_session_open(pid, user.as_deref())?;
            if let SessionOutcome::ProceedIsolated(adoption) = &outcome {
                eprintln!(
                    "joined step {} through pid {}",
                    adoption.step, adoption.target_pid
                );
            }

            let command = if command.is_empty() {
                vec![std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into())]
            } else {
                command
            };
            exec(&command)?;
        }

        Commands::Steps { job, json } => {
            let hooks = Lifecycle::new(config);
            let node_name = hooks.node_name()?;
            let mut steps = hooks.registry().list_steps(&node_name)?;
            if let Some(job) = job {
                steps.retain(|s| s.id.job_id == job);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else {
                for step in &steps {
                    println!("{:<20} {}", step.id.to_string(), step.socket.display());
                }
            }
        }
    }

    Ok(())
}
