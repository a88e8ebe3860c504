//! # Maze Client Library
//!
//! This library provides the client side of the multiplayer maze game: the
//! control connection used for lobby requests, the game channel that carries
//! movement commands and snapshots, and the mediator that ties both to a user
//! interface.
//!
//! ## Architecture Overview
//!
//! ### Two Connections
//! The control connection runs the shared session state machine as the
//! initiator, so it performs the SYN handshake and keeps itself alive with
//! heartbeats while idle. Creating or joining a game returns a ticket; the
//! client uses it to open the game channel of that instance, which carries
//! `Command`s out and `GamePacket`s back in.
//!
//! ### Single Mediator Task
//! Control messages, game packets and user actions are handled by one task.
//! The user interface is only called from that task and never blocks it.
//!
//! ### Error Presentation
//! Errors are shown as plain text, prefixed with `[local]` when they were
//! produced on this side and `[server]` when they came from the peer. Errors
//! that end the session carry a hint on how to reconnect.
//!
//! ## Module Organization
//!
//! ### Configuration (`config`)
//! `ClientConfig` with startup validation.
//!
//! ### Control Connection (`connection`)
//! `ControlConnection` with one helper per control request, and `ClientError`.
//!
//! ### Game Channel (`game_connection`)
//! Authentication with the ticket and the reader and writer tasks.
//!
//! ### Rendering (`render`)
//! Text for errors, notifications and answers, and the board drawing.
//!
//! ### Mediator (`mediator`)
//! `UserAction`, the `UserInterface` trait and the `Mediator` loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use maze_client::config::ClientConfig;
//! use maze_client::connection::ControlConnection;
//! use maze_client::mediator::{Mediator, UserAction, UserInterface};
//! use tokio::sync::mpsc;
//!
//! struct Printer;
//!
//! impl UserInterface for Printer {
//!     fn notify(&mut self, text: &str) {
//!         println!("{}", text);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::default().validate()?;
//!     let control = ControlConnection::connect(&config).await?;
//!
//!     let (actions_tx, mut actions) = mpsc::unbounded_channel();
//!     actions_tx.send(UserAction::ListGames)?;
//!     actions_tx.send(UserAction::Quit)?;
//!
//!     Mediator::new(control, config, Printer).run(&mut actions).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod game_connection;
pub mod mediator;
pub mod render;
