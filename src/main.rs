use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spindle_application::{ApplicationService, HttpApplicationService};
use spindle_kv::SqliteKv;
use spindle_model::{Execution, ExecutionStatus, ExecutionType};
use spindle_store::{ExecutionCriteria, ExecutionRepository, ExecutionStream, RepositoryConfig};

/// Connections kept open to the execution database.
const MAX_CONNECTIONS: u32 = 8;

/// Spindle - persistence and queries for deployment pipeline executions
#[derive(Parser)]
#[command(name = "spindle")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.spindle)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Repository config file (default: DATA_DIR/config.json when present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Store, inspect, and query executions
  Execution {
    #[command(subcommand)]
    command: ExecutionCommand,
  },

  /// Look up application metadata
  Application {
    #[command(subcommand)]
    command: ApplicationCommand,
  },
}

#[derive(Subcommand)]
enum ExecutionCommand {
  /// Store an execution read from a JSON file ("-" for stdin) and print its id
  Store { file: PathBuf },

  /// Print one execution
  Get {
    execution_type: ExecutionType,
    id: String,
  },

  /// Delete an execution and its index entries
  Delete {
    execution_type: ExecutionType,
    id: String,
  },

  /// Cancel an execution
  Cancel {
    execution_type: ExecutionType,
    id: String,

    /// Who requested the cancellation
    #[arg(long)]
    user: Option<String>,

    /// Why the execution was canceled
    #[arg(long)]
    reason: Option<String>,
  },

  /// Set the stored status of an execution
  Status {
    execution_type: ExecutionType,
    id: String,
    status: ExecutionStatus,
  },

  /// List every execution of a type, newest first
  List {
    execution_type: ExecutionType,

    /// Only executions of this application
    #[arg(long)]
    application: Option<String>,
  },

  /// List runs of a pipeline definition, most recent first
  PipelineRuns {
    pipeline_config_id: String,

    /// Acceptable statuses (repeatable)
    #[arg(long = "status")]
    statuses: Vec<ExecutionStatus>,

    /// Maximum number of runs
    #[arg(long)]
    limit: Option<usize>,
  },

  /// List orchestrations of an application, newest first
  Orchestrations {
    application: String,

    /// Acceptable statuses (repeatable)
    #[arg(long = "status")]
    statuses: Vec<ExecutionStatus>,

    /// Maximum number of orchestrations
    #[arg(long)]
    limit: Option<usize>,
  },
}

#[derive(Subcommand)]
enum ApplicationCommand {
  /// Fetch one application from the metadata service
  Get {
    /// Base URL of the metadata service
    #[arg(long)]
    url: String,

    #[arg(long)]
    account: String,

    name: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".spindle"),
  };

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Execution { command }) => {
      rt.block_on(run_execution_command(command, &data_dir, cli.config))
    }
    Some(Commands::Application { command }) => rt.block_on(run_application_command(command)),
    None => {
      println!("spindle - use --help to see available commands");
      Ok(())
    }
  }
}

async fn open_repository(data_dir: &Path, config_file: Option<PathBuf>) -> Result<ExecutionRepository> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let config_file = config_file.or_else(|| {
    let default = data_dir.join("config.json");
    default.exists().then_some(default)
  });
  let config = match config_file {
    Some(path) => RepositoryConfig::from_file(&path)
      .with_context(|| format!("failed to load config: {}", path.display()))?,
    None => RepositoryConfig::default(),
  };

  let db_path = data_dir.join("spindle.db");
  let kv = SqliteKv::connect(&format!("sqlite://{}", db_path.display()), MAX_CONNECTIONS)
    .await
    .with_context(|| format!("failed to open database: {}", db_path.display()))?;

  ExecutionRepository::new(Arc::new(kv), config).context("failed to create repository")
}

async fn run_execution_command(
  command: ExecutionCommand,
  data_dir: &Path,
  config_file: Option<PathBuf>,
) -> Result<()> {
  let repository = open_repository(data_dir, config_file).await?;

  match command {
    ExecutionCommand::Store { file } => {
      let content = read_input(&file)?;
      let mut execution: Execution = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse execution: {}", file.display()))?;
      repository
        .store(&mut execution)
        .await
        .context("failed to store execution")?;
      println!("{}", execution.id);
    }
    ExecutionCommand::Get { execution_type, id } => {
      let execution = repository
        .retrieve(execution_type, &id)
        .await
        .with_context(|| format!("failed to retrieve {} {}", execution_type, id))?;
      eprintln!(
        "{} {} (schema {}): {}",
        execution_type,
        id,
        execution.schema_version.number(),
        execution.visible_status()
      );
      println!("{}", serde_json::to_string_pretty(&execution)?);
    }
    ExecutionCommand::Delete { execution_type, id } => {
      repository
        .delete(execution_type, &id)
        .await
        .with_context(|| format!("failed to delete {} {}", execution_type, id))?;
      eprintln!("Deleted {} {}", execution_type, id);
    }
    ExecutionCommand::Cancel {
      execution_type,
      id,
      user,
      reason,
    } => {
      repository
        .cancel_with_reason(execution_type, &id, user.as_deref(), reason.as_deref())
        .await
        .with_context(|| format!("failed to cancel {} {}", execution_type, id))?;
      eprintln!("Canceled {} {}", execution_type, id);
    }
    ExecutionCommand::Status {
      execution_type,
      id,
      status,
    } => {
      repository
        .update_status(execution_type, &id, status)
        .await
        .with_context(|| format!("failed to update status of {} {}", execution_type, id))?;
      eprintln!("Updated {} {} to {}", execution_type, id, status);
    }
    ExecutionCommand::List {
      execution_type,
      application,
    } => {
      let stream = match application {
        Some(application) => {
          repository
            .retrieve_all_for_application(execution_type, &application)
            .await
        }
        None => repository.retrieve_all(execution_type).await,
      }
      .context("failed to list executions")?;
      print_stream(stream).await?;
    }
    ExecutionCommand::PipelineRuns {
      pipeline_config_id,
      statuses,
      limit,
    } => {
      let stream = repository
        .retrieve_for_pipeline_config(&pipeline_config_id, &criteria(statuses, limit))
        .await
        .context("failed to list pipeline runs")?;
      print_stream(stream).await?;
    }
    ExecutionCommand::Orchestrations {
      application,
      statuses,
      limit,
    } => {
      let stream = repository
        .retrieve_for_application(&application, &criteria(statuses, limit))
        .await
        .context("failed to list orchestrations")?;
      print_stream(stream).await?;
    }
  }

  Ok(())
}

async fn run_application_command(command: ApplicationCommand) -> Result<()> {
  match command {
    ApplicationCommand::Get { url, account, name } => {
      let service = HttpApplicationService::new(&url).context("failed to create application client")?;
      match service
        .get_application(&account, &name)
        .await
        .with_context(|| format!("failed to fetch application {}", name))?
      {
        Some(application) => println!("{}", serde_json::to_string_pretty(&application)?),
        None => eprintln!("Application {} not found in account {}", name, account),
      }
    }
  }
  Ok(())
}

fn criteria(statuses: Vec<ExecutionStatus>, limit: Option<usize>) -> ExecutionCriteria {
  let criteria = ExecutionCriteria::new().with_statuses(statuses);
  match limit {
    Some(limit) => criteria.with_limit(limit),
    None => criteria,
  }
}

/// Print each execution as one JSON line until the stream ends or Ctrl-C.
async fn print_stream(mut stream: ExecutionStream) -> Result<()> {
  let mut printed = 0usize;
  loop {
    tokio::select! {
        next = stream.next() => match next {
          Some(execution) => {
            println!("{}", serde_json::to_string(&execution)?);
            printed += 1;
          }
          None => break,
        },
        _ = tokio::signal::ctrl_c() => {
          stream.cancel();
          eprintln!("Interrupted");
          break;
        }
    }
  }
  eprintln!("{} executions", printed);
  Ok(())
}

/// Read a file, or stdin when the path is "-".
fn read_input(path: &Path) -> Result<String> {
  if path.as_os_str() == "-" {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read execution from stdin")?;
    return Ok(input);
  }
  std::fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}
