//! # Maze Server Library
//!
//! This library provides the authoritative server for the multiplayer maze
//! game. Clients talk to it over a control connection (requests such as
//! creating or joining a game) and, once in a game, over a separate game
//! channel that carries movement commands in and world snapshots out.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every game instance runs a fixed-interval tick loop. Each tick applies the
//! last command received from every player, resolves keys, gates and
//! guardians, detects the end of the game and sends one snapshot per player
//! describing a single consistent world state.
//!
//! ### Session Management
//! Control connections go through the shared session state machine: the SYN
//! handshake, the response watchdog and the closing sequence. Malformed or
//! unexpected traffic is answered with ERROR messages rather than dropped.
//!
//! ### Game Directory
//! Games are created on request, listed for other players, restarted or
//! terminated by their owner and cleaned up once finished or abandoned.
//!
//! ## Architecture Design
//!
//! ### Task per Connection
//! Each control connection is served by one task selecting over its session,
//! the events of the player it controls and the lobby deadline. Each game
//! instance owns a tick task and a listener task for its game channel; every
//! game channel connection gets a reader and a writer task.
//!
//! ### Locking Discipline
//! Shared state is guarded by `parking_lot` locks that are never held across
//! an `.await`. Locks are always taken in the order maze, registry, actor.
//! The tick holds the maze lock for its whole duration, so join and leave
//! can never interleave with a half-built snapshot.
//!
//! ### Explicit Teardown
//! Stopping an instance is a fixed sequence: cancel its tasks, notify and
//! remove every player, then release the maze.
//!
//! ## Module Organization
//!
//! ### Configuration (`config`)
//! `ServerConfig` with startup validation and the per-game `GameConfig`.
//!
//! ### World (`maze`, `maze_loader`)
//! The torus grid with its cells, keys, gates and guardians, and the loaders
//! that build it from a maze definition.
//!
//! ### Players (`player`, `players_registry`)
//! `PlayerActor` movement and damage rules and the fixed four-slot registry.
//!
//! ### Games (`game_instance`, `player_channel`, `games`)
//! The tick loop and lifecycle of a single game, its game channel listener
//! and the directory of running games.
//!
//! ### Control Channel (`network`, `client_handler`, `router`)
//! The accept loop, the per-connection handler and the dispatch tables that
//! answer control requests.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mazed::config::ServerConfig;
//! use mazed::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().validate()?;
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_handler;
pub mod config;
pub mod game_instance;
pub mod games;
pub mod maze;
pub mod maze_loader;
pub mod network;
pub mod player;
pub mod player_channel;
pub mod players_registry;
pub mod router;
