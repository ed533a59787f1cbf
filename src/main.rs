//! Binary entrypoint for the worldgraph admin CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and the data directory
//! - `status` - print store counts
//! - `room <id>` - print a room with its outbound exits
//! - `exits <room>` / `create-exit` / `update-exit` / `delete-exit` - edit the exit graph
//! - `dig` - create a room and connect it in one step
//! - `locate` / `move-item` / `remove-item` - inspect and edit item placement
//! - `delete-room <id> [--cascade]` - remove a room
//! - `seed <file>` - apply a JSON world seed to a world with no rooms
//! - `audit` - scan the store for dangling references
//!
//! Results are printed as JSON on stdout; logs go to stderr or the
//! configured log file.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::json;
use uuid::Uuid;

use worldgraph::config::Config;
use worldgraph::world::{
    apply_seed_to_empty, load_seed_from_json, Direction, DoorSpec, ExitPatch, NewExit, NewRoom,
    Placement, ReverseOutcome, RoomDeletion, TrapSpec, WorldService,
};

#[derive(Parser)]
#[command(name = "worldgraph")]
#[command(about = "Room topology and item containment store for text worlds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Args)]
struct DoorArgs {
    /// Door name, e.g. "oak door"
    #[arg(long)]
    door: Option<String>,
    /// Lock the door
    #[arg(long, requires = "door")]
    locked: bool,
    /// Lock difficulty rating
    #[arg(long, requires = "door")]
    lock_difficulty: Option<u8>,
    /// Template id of the key that opens the door
    #[arg(long, requires = "door")]
    key: Option<u64>,
}

impl DoorArgs {
    fn spec(&self) -> Option<DoorSpec> {
        self.door.as_ref().map(|name| DoorSpec {
            name: name.clone(),
            is_locked: self.locked,
            lock_difficulty: self.lock_difficulty,
            required_key_template_id: self.key,
        })
    }
}

#[derive(clap::Args)]
struct TrapArgs {
    /// Trap detection difficulty
    #[arg(long)]
    trap_difficulty: Option<u8>,
    /// Damage dealt when triggered
    #[arg(long, default_value_t = 0)]
    trap_damage: u32,
    #[arg(long, default_value = "physical")]
    trap_type: String,
}

impl TrapArgs {
    fn spec(&self) -> Option<TrapSpec> {
        self.trap_difficulty
            .map(|difficulty| TrapSpec::new(difficulty, self.trap_damage, &self.trap_type))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Show store counts and counters
    Status,
    /// Show a room and its exits
    Room { id: u64 },
    /// List exits leaving a room
    Exits { room: u64 },
    /// Create an exit
    CreateExit {
        from: u64,
        direction: String,
        to: u64,
        /// Also create the exit back
        #[arg(long)]
        two_way: bool,
        #[arg(long)]
        hidden: bool,
        #[command(flatten)]
        door: DoorArgs,
        #[command(flatten)]
        trap: TrapArgs,
    },
    /// Change an exit's destination, visibility, door or trap
    UpdateExit {
        id: u64,
        #[arg(long)]
        to: Option<u64>,
        #[arg(long)]
        hidden: Option<bool>,
        #[command(flatten)]
        door: DoorArgs,
        /// Remove the door
        #[arg(long, conflicts_with = "door")]
        no_door: bool,
        #[command(flatten)]
        trap: TrapArgs,
        /// Remove the trap
        #[arg(long, conflicts_with = "trap_difficulty")]
        no_trap: bool,
    },
    /// Delete an exit
    DeleteExit {
        id: u64,
        /// Also delete the exit pointing back
        #[arg(long)]
        with_reverse: bool,
    },
    /// Create a room in the area of `from` and connect it
    Dig {
        from: u64,
        direction: String,
        name: String,
        #[arg(long)]
        one_way: bool,
        #[command(flatten)]
        door: DoorArgs,
    },
    /// Delete a room
    DeleteRoom {
        id: u64,
        /// Remove its exits and floor items as well
        #[arg(long)]
        cascade: bool,
    },
    /// Show where an item instance is
    Locate { item: Uuid },
    /// Move an item: target is room:<id>, char:<id> or item:<uuid>
    MoveItem { item: Uuid, target: String },
    /// Delete an item instance
    RemoveItem {
        item: Uuid,
        #[arg(long)]
        cascade: bool,
    },
    /// Apply a JSON world seed
    Seed { file: String },
    /// Check the store for dangling references
    Audit,
}

fn parse_placement(target: &str) -> Result<Placement> {
    let (kind, id) = target
        .split_once(':')
        .ok_or_else(|| anyhow!("target must look like room:<id>, char:<id> or item:<uuid>"))?;
    let placement = match kind {
        "room" => Placement::InRoom(id.parse()?),
        "char" | "character" => Placement::OnCharacter(id.parse()?),
        "item" | "container" => Placement::InContainer(id.parse()?),
        other => return Err(anyhow!("unknown target kind '{}'", other)),
    };
    Ok(placement)
}

fn reverse_json(outcome: &ReverseOutcome) -> serde_json::Value {
    match outcome {
        ReverseOutcome::NotRequested => json!({ "status": "not_requested" }),
        ReverseOutcome::Created(exit) => json!({ "status": "created", "exit": exit }),
        ReverseOutcome::Removed(exit) => json!({ "status": "removed", "exit": exit }),
        ReverseOutcome::Absent => json!({ "status": "absent" }),
        ReverseOutcome::Failed(err) => json!({ "status": "failed", "warning": err.to_string() }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    if let Commands::Init = cli.command {
        info!("Initializing new worldgraph configuration");
        Config::create_default(&cli.config).await?;
        let config = Config::load(&cli.config).await?;
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = match pre_config {
        Some(config) => config,
        None => Config::load(&cli.config).await?,
    };
    let world = WorldService::open(&config)?;

    let output = match cli.command {
        Commands::Init => return Ok(()),
        Commands::Status => {
            let store = world.store();
            json!({
                "rooms": store.count_rooms(),
                "exits": store.count_exits(),
                "items": store.count_items(),
                "db_path": config.storage.world_db_path(),
            })
        }
        Commands::Room { id } => serde_json::to_value(world.room_snapshot(id)?)?,
        Commands::Exits { room } => serde_json::to_value(world.list_exits(room)?)?,
        Commands::CreateExit {
            from,
            direction,
            to,
            two_way,
            hidden,
            door,
            trap,
        } => {
            let request = NewExit {
                source: from,
                direction: direction.parse::<Direction>()?,
                destination: to,
                hidden,
                door: door.spec(),
                trap: trap.spec(),
                create_reverse: two_way,
            };
            let created = world.create_exit(&request)?;
            json!({ "exit": created.exit, "reverse": reverse_json(&created.reverse) })
        }
        Commands::UpdateExit {
            id,
            to,
            hidden,
            door,
            no_door,
            trap,
            no_trap,
        } => {
            let patch = ExitPatch {
                destination: to,
                hidden,
                door: if no_door { Some(None) } else { door.spec().map(Some) },
                trap: if no_trap { Some(None) } else { trap.spec().map(Some) },
            };
            serde_json::to_value(world.update_exit(id, &patch)?)?
        }
        Commands::DeleteExit { id, with_reverse } => {
            let deleted = world.delete_exit(id, with_reverse)?;
            json!({ "removed": deleted.removed, "reverse": reverse_json(&deleted.reverse) })
        }
        Commands::Dig {
            from,
            direction,
            name,
            one_way,
            door,
        } => {
            let area = world.room(from)?.area_id;
            let dug = world.dig(
                from,
                direction.parse::<Direction>()?,
                &NewRoom::new(area, &name),
                door.spec(),
                !one_way,
            )?;
            json!({
                "room": dug.room,
                "exit": dug.exit.exit,
                "reverse": reverse_json(&dug.exit.reverse),
            })
        }
        Commands::DeleteRoom { id, cascade } => {
            let policy = if cascade {
                RoomDeletion::Cascade
            } else {
                RoomDeletion::Reject
            };
            let removal = world.delete_room(id, policy)?;
            json!({
                "room": removal.room,
                "exits_removed": removal.exits_removed,
                "items_removed": removal.items_removed,
            })
        }
        Commands::Locate { item } => serde_json::to_value(world.locate(item)?)?,
        Commands::MoveItem { item, target } => {
            let change = world.relocate(item, parse_placement(&target)?)?;
            json!({ "item": change.item, "from": change.from, "to": change.to })
        }
        Commands::RemoveItem { item, cascade } => {
            json!({ "removed": world.remove_instance(item, cascade)? })
        }
        Commands::Seed { file } => {
            let seed = load_seed_from_json(&file)?;
            let summary = apply_seed_to_empty(&world, &seed)?;
            info!("Applied seed {}: {}", file, summary);
            json!({
                "areas": summary.areas,
                "rooms": summary.rooms,
                "item_templates": summary.item_templates,
                "characters": summary.characters,
                "exits": summary.exits,
                "reverse_exits": summary.reverse_exits,
                "items": summary.items,
                "warnings": summary.warnings,
            })
        }
        Commands::Audit => {
            let report = world.audit()?;
            let clean = report.is_clean();
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !clean {
                std::process::exit(1);
            }
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match (verbosity, config) {
        (0, Some(cfg)) => cfg.logging.level_filter(),
        (0, None) => log::LevelFilter::Info,
        (1, _) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    builder.target(env_logger::Target::Stderr);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Interactive runs also echo to the console
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
