use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ffl_core::PipelineConfig;
use ffl_pipeline::{ApprovalWorkflow, Stores};
use ffl_storage::Resolution;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffl")]
#[command(about = "Fleet fuel admin CLI", long_about = None)]
struct Cli {
    /// Directory holding the mailbox and all document stores.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Optional JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List unresolved approval requests
    Pending,
    /// Approve a pending request by id
    Approve { id: String },
    /// Reject a pending request by id
    Reject { id: String },
    /// Per-vehicle efficiency summary
    Summary {
        entity: String,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Manage the fleet allow-list
    Fleet {
        #[command(subcommand)]
        action: FleetCommands,
    },
}

#[derive(Subcommand)]
enum FleetCommands {
    Add { entity: String },
    Remove { entity: String },
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let stores = Stores::open(&cli.data_dir, &config).context("opening stores")?;

    match cli.command {
        Commands::Pending => {
            let pending = stores.approvals.pending()?;
            if pending.is_empty() {
                println!("No pending approvals.");
                return Ok(());
            }
            for approval in pending {
                println!(
                    "{}  {}  {}  {}",
                    approval.id, approval.kind, approval.proposed.entity, approval.reason
                );
            }
        }
        Commands::Approve { id } => {
            let workflow =
                ApprovalWorkflow::new(&stores.approvals, &stores.mailbox, &stores.notifications);
            report_resolution(&id, workflow.approve(&id, Utc::now())?, "approved");
        }
        Commands::Reject { id } => {
            let workflow =
                ApprovalWorkflow::new(&stores.approvals, &stores.mailbox, &stores.notifications);
            report_resolution(&id, workflow.reject(&id, Utc::now())?, "rejected");
        }
        Commands::Summary { entity, days } => {
            let summary = stores.efficiency.summary(&entity, days, Utc::now())?;
            if summary.records == 0 {
                println!("No efficiency records for {} in the last {days} days.", summary.entity);
                return Ok(());
            }
            println!("{} - last {days} days", summary.entity);
            println!("Records:        {}", summary.records);
            println!("Avg efficiency: {:.1} km/L", summary.avg_km_per_liter);
            println!("Min efficiency: {:.1} km/L", summary.min_km_per_liter);
            println!("Max efficiency: {:.1} km/L", summary.max_km_per_liter);
            println!("Total distance: {} km", summary.total_distance_km);
            println!("Total fuel:     {:.1} L", summary.total_liters);
        }
        Commands::Fleet { action } => match action {
            FleetCommands::Add { entity } => {
                if stores.fleet.add(&entity)? {
                    println!("Added {}", ffl_core::normalize_entity(&entity));
                } else {
                    println!("{} is already in the fleet.", ffl_core::normalize_entity(&entity));
                }
            }
            FleetCommands::Remove { entity } => {
                if stores.fleet.remove(&entity)? {
                    println!("Removed {}", ffl_core::normalize_entity(&entity));
                } else {
                    println!("{} is not in the fleet.", ffl_core::normalize_entity(&entity));
                }
            }
            FleetCommands::List => {
                let entities = stores.fleet.list()?;
                if entities.is_empty() {
                    println!("Fleet list is empty.");
                }
                for entity in entities {
                    println!("{entity}");
                }
            }
        },
    }

    Ok(())
}

fn report_resolution(id: &str, resolution: Resolution, verb: &str) {
    match resolution {
        Resolution::Applied(approval) => {
            println!("Approval {id} {verb} ({})", approval.proposed.entity);
        }
        Resolution::NotFound => println!("No approval with id {id}."),
        Resolution::AlreadyResolved => println!("Approval {id} was already resolved."),
    }
}
