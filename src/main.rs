use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;

use dk_installer::app::{handle_fatal_error, init_logging, InstallerConfig};
use dk_installer::definition::{Variables, WorkflowDefinition};
use dk_installer::installer::Installer;
use dk_installer::session::command_slug;

/// Run installer workflows with logged, recoverable steps
#[derive(Parser)]
#[command(name = "dk-installer", version)]
#[command(about = "Provision and tear down platforms through logged, recoverable workflows", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Echo the session log to the terminal
    #[arg(long, global = true)]
    debug: bool,

    /// Folder where session log archives are kept
    #[arg(long, value_name = "DIR", global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow definition
    Run {
        /// Path to the workflow definition (YAML)
        definition: PathBuf,

        /// Set a variable used by `{key}` placeholders
        #[arg(long = "set", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Prefix of the session folder and archive
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Check a workflow definition without running it
    Validate {
        /// Path to the workflow definition (YAML)
        definition: PathBuf,

        /// Set a variable used by `{key}` placeholders
        #[arg(long = "set", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => handle_fatal_error(e, verbose),
    };
    init_logging(&config);

    match run(cli.command, config).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => handle_fatal_error(e, verbose),
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<InstallerConfig> {
    let config = InstallerConfig::new(cli.verbose)?.with_debug(cli.debug);
    Ok(match &cli.logs_dir {
        Some(dir) => config.with_logs_root(dir),
        None => config,
    })
}

async fn run(command: Commands, config: InstallerConfig) -> anyhow::Result<i32> {
    match command {
        Commands::Run {
            definition,
            vars,
            prefix,
        } => {
            let (definition, vars) = load(&definition, &vars)?;
            let mut workflow = definition.build(&vars)?;
            let prefix = prefix.unwrap_or_else(|| default_prefix(&definition.label));
            debug!("Running workflow [{}] with prefix [{}]", definition.label, prefix);

            let outcome = Installer::new(config)
                .run(&prefix, &mut workflow, &())
                .await;
            if let Some(archive) = &outcome.archive {
                debug!("Session logs archived at {}", archive.display());
            }
            Ok(outcome.exit_code)
        }
        Commands::Validate { definition, vars } => {
            let (definition, vars) = load(&definition, &vars)?;
            let workflow = definition.build(&vars)?;
            println!(
                "Workflow '{}' is valid: {} requirement(s), {} step(s)",
                workflow.label(),
                workflow.requirements().len(),
                workflow.step_labels().len()
            );
            for label in workflow.step_labels() {
                println!("  - {}", label);
            }
            Ok(0)
        }
    }
}

fn load(path: &Path, vars: &[String]) -> anyhow::Result<(WorkflowDefinition, Variables)> {
    let definition = WorkflowDefinition::load(path)
        .with_context(|| format!("Could not load workflow definition {}", path.display()))?;
    let vars = Variables::from_assignments(vars)?;
    Ok((definition, vars))
}

fn default_prefix(label: &str) -> String {
    let slug = command_slug(label).to_lowercase();
    if slug.is_empty() {
        "dk-installer".to_string()
    } else {
        slug
    }
}
