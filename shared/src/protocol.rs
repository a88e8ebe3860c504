//! Wire-level message types shared by the maze server and client
//!
//! Every control-channel frame carries a list of [`RawMessage`] values. A raw
//! message stores its kind, sub-discriminant and status as plain bytes so that
//! values produced by a newer (or corrupted) peer can be detected and rejected
//! explicitly instead of being silently mapped onto the wrong variant.
//! [`Message`] is the typed counterpart used everywhere above the codec.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Declares a wire enumeration whose discriminants are dense indices
/// starting at zero, together with its size and a checked decoder.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $size:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant in wire order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Decodes a wire index, returning `None` when it is outside the declared range
            pub fn from_index(index: u8) -> Option<Self> {
                Self::ALL.get(index as usize).copied()
            }

            pub fn index(self) -> u8 {
                self as u8
            }
        }

        pub const $size: usize = $name::ALL.len();
    };
}

wire_enum!(
    /// Top-level message discriminant
    Kind, KIND_SIZE { Ctrl, Info, Error }
);

wire_enum!(
    /// Control requests and their answers
    CtrlType, CTRL_TYPE_SIZE {
        Syn,
        Fin,
        LoginOrCreateUser,
        SetNick,
        ListSaves,
        ListGames,
        CreateGame,
        LoadGame,
        SaveGame,
        JoinGame,
        LeaveGame,
        RestartGame,
        TerminateGame,
    }
);

wire_enum!(
    /// Informational messages, including the heartbeat
    InfoType, INFO_TYPE_SIZE {
        Hello,
        LoadData,
        GamesData,
        PlayerJoined,
        PlayerLeft,
        PlayerKilled,
        PlayerGameOver,
        PlayerWin,
        GameRestarted,
        GameTerminated,
        GameFinished,
    }
);

wire_enum!(
    /// Error categories reported between peers or synthesised locally
    ErrorType, ERROR_TYPE_SIZE {
        WrongProtocol,
        EmptyMessage,
        MultipleMessages,
        Timeout,
        AlreadyPlayed,
        UnknownError,
        Handshake,
        ClosedConnection,
        AlreadyInGame,
        NoJoinedGame,
        MazeBroken,
    }
);

wire_enum!(
    /// Message status
    ///
    /// `Local` and `GameLocal` mark messages generated by the local side of a
    /// control or player channel respectively; they never travel on the wire
    /// from a well-behaved peer.
    Status, STATUS_SIZE { Ack, Nack, Query, Update, Set, Local, GameLocal }
);

/// Rejections produced while converting a [`RawMessage`] into a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message kind {0} is out of range")]
    KindOutOfRange(u8),
    #[error("{kind:?} subtype {value} is out of range")]
    SubtypeOutOfRange { kind: Kind, value: u8 },
    #[error("message status {0} is out of range")]
    StatusOutOfRange(u8),
}

/// Kind-specific sub-discriminant. The variant doubles as the message kind,
/// so a subtype can never be paired with the wrong kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subtype {
    Ctrl(CtrlType),
    Info(InfoType),
    Error(ErrorType),
}

impl Subtype {
    pub fn kind(self) -> Kind {
        match self {
            Subtype::Ctrl(_) => Kind::Ctrl,
            Subtype::Info(_) => Kind::Info,
            Subtype::Error(_) => Kind::Error,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Subtype::Ctrl(t) => t.index(),
            Subtype::Info(t) => t.index(),
            Subtype::Error(t) => t.index(),
        }
    }

    fn decode(kind: Kind, value: u8) -> Result<Self, ProtocolError> {
        let decoded = match kind {
            Kind::Ctrl => CtrlType::from_index(value).map(Subtype::Ctrl),
            Kind::Info => InfoType::from_index(value).map(Subtype::Info),
            Kind::Error => ErrorType::from_index(value).map(Subtype::Error),
        };
        decoded.ok_or(ProtocolError::SubtypeOutOfRange { kind, value })
    }
}

/// Untyped message exactly as it travels inside a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub kind: u8,
    pub subtype: u8,
    pub status: u8,
    pub data: Vec<String>,
}

/// A decoded control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub struct Message {
    pub subtype: Subtype,
    pub status: Status,
    pub data: Vec<String>,
}

impl Message {
    pub fn new(subtype: Subtype, status: Status) -> Self {
        Self {
            subtype,
            status,
            data: Vec::new(),
        }
    }

    pub fn ctrl(ctrl: CtrlType, status: Status) -> Self {
        Self::new(Subtype::Ctrl(ctrl), status)
    }

    pub fn info(info: InfoType, status: Status) -> Self {
        Self::new(Subtype::Info(info), status)
    }

    pub fn error(error: ErrorType, status: Status) -> Self {
        Self::new(Subtype::Error(error), status)
    }

    /// Error synthesised by the local side, carrying a human readable reason
    pub fn local_error(error: ErrorType, reason: impl Into<String>) -> Self {
        Self::error(error, Status::Local).with_data(vec![reason.into()])
    }

    pub fn with_data(mut self, data: Vec<String>) -> Self {
        self.data = data;
        self
    }

    pub fn kind(&self) -> Kind {
        self.subtype.kind()
    }

    /// Returns true when the message has the given subtype and status
    pub fn is(&self, subtype: Subtype, status: Status) -> bool {
        self.subtype == subtype && self.status == status
    }

    /// Returns the error subtype when this is an ERROR message
    pub fn error_type(&self) -> Option<ErrorType> {
        match self.subtype {
            Subtype::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn first_field(&self) -> Option<&str> {
        self.data.first().map(String::as_str)
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = ProtocolError;

    fn try_from(raw: RawMessage) -> Result<Self, ProtocolError> {
        let kind = Kind::from_index(raw.kind).ok_or(ProtocolError::KindOutOfRange(raw.kind))?;
        let subtype = Subtype::decode(kind, raw.subtype)?;
        let status =
            Status::from_index(raw.status).ok_or(ProtocolError::StatusOutOfRange(raw.status))?;

        Ok(Message {
            subtype,
            status,
            data: raw.data,
        })
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        RawMessage {
            kind: message.kind().index(),
            subtype: message.subtype.index(),
            status: message.status.index(),
            data: message.data,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subtype {
            Subtype::Ctrl(t) => write!(f, "CTRL/{:?}/{:?}", t, self.status)?,
            Subtype::Info(t) => write!(f, "INFO/{:?}/{:?}", t, self.status)?,
            Subtype::Error(t) => write!(f, "ERROR/{:?}/{:?}", t, self.status)?,
        }
        if !self.data.is_empty() {
            write!(f, " {:?}", self.data)?;
        }
        Ok(())
    }
}

/// Player command sent on the game channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Left,
    Right,
    Up,
    Down,
    Stop,
    TakeOpen,
    StartContinue,
    Pause,
}

impl Command {
    /// Admin commands are applied at receipt time instead of being buffered for the next tick
    pub fn is_admin(self) -> bool {
        matches!(self, Command::StartContinue | Command::Pause)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveResult {
    Possible,
    NotPossible,
}

/// Grid position as (row, column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coords {
    pub row: i16,
    pub col: i16,
}

impl Coords {
    /// Reported for a player that is no longer on the board
    pub const ABSENT: Coords = Coords { row: -1, col: -1 };

    pub const fn new(row: i16, col: i16) -> Self {
        Self { row, col }
    }

    pub fn is_absent(self) -> bool {
        self == Coords::ABSENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub slot: u8,
    pub coords: Coords,
}

/// One simulation snapshot, produced once per tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_num: u64,
    /// Result of the receiving player's own last command
    pub last_move: MoveResult,
    pub players: Vec<PlayerPosition>,
    pub guardians: Vec<Coords>,
    pub opened_gates: Vec<Coords>,
    pub keys: Vec<Coords>,
}

/// Server-to-client frame on the player channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePacket {
    Update(Update),
    Event(Message),
    /// Immediate result of a START_CONTINUE or PAUSE command
    Answer {
        command: Command,
        result: MoveResult,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Lobby,
    Running,
    Paused,
    Finished,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Lobby => "LOBBY",
            GameStatus::Running => "RUNNING",
            GameStatus::Paused => "PAUSED",
            GameStatus::Finished => "FINISHED",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "LOBBY" => Some(GameStatus::Lobby),
            "RUNNING" => Some(GameStatus::Running),
            "PAUSED" => Some(GameStatus::Paused),
            "FINISHED" => Some(GameStatus::Finished),
            _ => None,
        }
    }
}

/// One entry of a LIST_GAMES answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInfo {
    pub id: String,
    pub maze_name: String,
    pub status: GameStatus,
    pub used_slots: u8,
    pub players: Vec<String>,
}

impl GameInfo {
    /// Encodes the entry as a single payload field: `id;maze;STATUS;used;nick,nick`
    pub fn encode(&self) -> String {
        format!(
            "{};{};{};{};{}",
            self.id,
            self.maze_name,
            self.status.as_str(),
            self.used_slots,
            self.players.join(",")
        )
    }

    pub fn decode(field: &str) -> Option<Self> {
        let mut parts = field.splitn(5, ';');
        let id = parts.next()?.to_string();
        let maze_name = parts.next()?.to_string();
        let status = GameStatus::parse(parts.next()?)?;
        let used_slots = parts.next()?.parse().ok()?;
        let players = match parts.next()? {
            "" => Vec::new(),
            nicks => nicks.split(',').map(str::to_string).collect(),
        };

        Some(GameInfo {
            id,
            maze_name,
            status,
            used_slots,
            players,
        })
    }
}

/// Everything a client needs to open the player channel of an instance.
/// Carried in the payload of CREATE_GAME and JOIN_GAME acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameTicket {
    pub game_id: String,
    pub port: u16,
    pub auth_key: String,
    pub rows: i16,
    pub cols: i16,
    pub scheme: String,
}

impl GameTicket {
    pub fn to_data(&self) -> Vec<String> {
        vec![
            self.game_id.clone(),
            self.port.to_string(),
            self.auth_key.clone(),
            self.rows.to_string(),
            self.cols.to_string(),
            self.scheme.clone(),
        ]
    }

    pub fn from_data(data: &[String]) -> Option<Self> {
        match data {
            [game_id, port, auth_key, rows, cols, scheme] => Some(GameTicket {
                game_id: game_id.clone(),
                port: port.parse().ok()?,
                auth_key: auth_key.clone(),
                rows: rows.parse().ok()?,
                cols: cols.parse().ok()?,
                scheme: scheme.clone(),
            }),
            _ => None,
        }
    }
}
