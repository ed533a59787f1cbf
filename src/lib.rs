//! # Worldgraph - room topology and item containment for text worlds
//!
//! Worldgraph keeps the spatial model of a multi-user text world: rooms
//! grouped into areas, directed exits between rooms, and the containment
//! ledger that records where every item instance is.
//!
//! ## Features
//!
//! - **Exit graph**: at most one exit per direction per room, optional
//!   door and trap sub-records, best-effort reverse exits.
//! - **Containment ledger**: every instance lies in a room, is carried by a
//!   character, or sits inside a container; cycles are rejected.
//! - **Atomic updates**: checks and writes share one sled transaction, so
//!   concurrent callers never both win the same exit slot.
//! - **Seeding**: data-driven world setup from JSON.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use worldgraph::config::Config;
//! use worldgraph::world::{Direction, NewExit, WorldService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let world = WorldService::open(&config)?;
//!
//!     let created = world.create_exit(&NewExit::new(1, Direction::North, 2).two_way())?;
//!     if let Some(warning) = created.reverse.warning() {
//!         eprintln!("{}", warning);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`world`] - exit graph, containment ledger, storage and the service facade
//! - [`config`] - configuration loading and defaults
//! - [`metrics`] - process-wide counters

pub mod config;
pub mod metrics;
pub mod world;
