//! # Maze Shared Library
//!
//! Types and connection machinery used by both the maze server and its
//! clients. Anything that travels over a socket is defined here so that both
//! sides agree on it by construction.
//!
//! ## Module Organization
//!
//! ### Protocol (`protocol`)
//! Wire messages and game data:
//! - `Message` with its kind, range-checked subtype and status
//! - `Command` sent by players and the per-tick `Update` snapshot
//! - `GameInfo` and `GameTicket` payload helpers
//!
//! ### Codec (`codec`)
//! Framing of every stream: an 8 byte hex length header followed by a bincode
//! payload. Decode failures are classified into fatal and recoverable errors.
//!
//! ### Session (`session`)
//! The connection state machine. Handles the SYN handshake, heartbeats while
//! idle, the response watchdog and the closing sequence for both the
//! initiating and the accepting side.

pub mod codec;
pub mod protocol;
pub mod session;

pub use codec::FrameError;
pub use protocol::{
    Command, Coords, CtrlType, ErrorType, GameInfo, GamePacket, GameStatus, GameTicket, InfoType,
    Kind, Message, MoveResult, PlayerPosition, Status, Subtype, Update,
};
pub use session::{DisconnectOutcome, Session, SessionConfig, SessionError, SessionState};

/// Players per game instance
pub const GAME_MAX_PLAYERS: usize = 4;

pub const DEFAULT_PORT: u16 = 49429;
pub const DEFAULT_MAX_PING_MS: u64 = 20000;
pub const DEFAULT_HELLO_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_GAME_SPEED_MS: u64 = 1000;
pub const DEFAULT_PLAYER_LIVES: u8 = 3;
