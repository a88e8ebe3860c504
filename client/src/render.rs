//! Plain text rendering of server messages and game snapshots

use maze_shared::{
    Command, CtrlType, ErrorType, GameInfo, GameTicket, InfoType, Message, MoveResult, Status,
    Subtype, Update,
};

const RECONNECT_HINT: &str = "the connection is gone, use `connect` to open a new one or `quit`";

/// Errors after which the session is closed
pub fn is_connection_ending(error: ErrorType) -> bool {
    matches!(
        error,
        ErrorType::Timeout
            | ErrorType::ClosedConnection
            | ErrorType::Handshake
            | ErrorType::WrongProtocol
    )
}

fn error_text(error: ErrorType) -> &'static str {
    match error {
        ErrorType::WrongProtocol => "wrong protocol",
        ErrorType::EmptyMessage => "empty message",
        ErrorType::MultipleMessages => "multiple messages in one frame",
        ErrorType::Timeout => "timed out",
        ErrorType::AlreadyPlayed => "already played",
        ErrorType::UnknownError => "unknown error",
        ErrorType::Handshake => "handshake failed",
        ErrorType::ClosedConnection => "connection closed",
        ErrorType::AlreadyInGame => "already in a game, leave it first",
        ErrorType::NoJoinedGame => "not in a game",
        ErrorType::MazeBroken => "maze cannot be loaded",
    }
}

/// Renders an ERROR message with its origin and, when the session is over, a hint
pub fn describe_error(message: &Message) -> String {
    let Some(error) = message.error_type() else {
        return message.to_string();
    };

    let origin = match message.status {
        Status::Local | Status::GameLocal => "[local]",
        _ => "[server]",
    };

    let mut text = format!("{} {}", origin, error_text(error));
    if !message.data.is_empty() {
        text.push_str(": ");
        text.push_str(&message.data.join(", "));
    }
    // a lost game channel does not end the control session
    if is_connection_ending(error) && message.status != Status::GameLocal {
        text.push_str(" (");
        text.push_str(RECONNECT_HINT);
        text.push(')');
    }
    text
}

pub fn describe_info(message: &Message) -> String {
    let who = message.data.join(", ");
    match message.subtype {
        Subtype::Info(InfoType::PlayerJoined) => format!("{} joined the game", who),
        Subtype::Info(InfoType::PlayerLeft) => format!("{} left the game", who),
        Subtype::Info(InfoType::PlayerKilled) => format!("{} was caught by a guardian", who),
        Subtype::Info(InfoType::PlayerGameOver) => format!("{} is out of lives", who),
        Subtype::Info(InfoType::PlayerWin) => format!("{} reached the target", who),
        Subtype::Info(InfoType::GameRestarted) => "the game was restarted".to_string(),
        Subtype::Info(InfoType::GameTerminated) => "the game was terminated".to_string(),
        Subtype::Info(InfoType::GameFinished) if who.is_empty() => {
            "game over, nobody won".to_string()
        }
        Subtype::Info(InfoType::GameFinished) => format!("game over, won by {}", who),
        _ => message.to_string(),
    }
}

/// Renders the answer to a control request
pub fn describe_answer(request: CtrlType, message: &Message) -> String {
    let outcome = match message.status {
        Status::Ack => "ok",
        Status::Nack => "refused",
        _ => "",
    };
    match message.first_field() {
        Some(detail) => format!("{:?}: {} ({})", request, outcome, detail),
        None => format!("{:?}: {}", request, outcome),
    }
}

pub fn describe_command_result(command: Command, result: MoveResult) -> String {
    match result {
        MoveResult::Possible => format!("{:?} accepted", command),
        MoveResult::NotPossible => format!("{:?} not possible", command),
    }
}

pub fn describe_games(games: &[GameInfo]) -> String {
    if games.is_empty() {
        return "no games running".to_string();
    }
    games
        .iter()
        .map(|g| {
            format!(
                "{}  {:<16} {:<8} {}/{}  {}",
                g.id,
                g.maze_name,
                g.status.as_str(),
                g.used_slots,
                maze_shared::GAME_MAX_PLAYERS,
                g.players.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Static layout of the maze, taken from the ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    rows: usize,
    cols: usize,
    cells: Vec<Vec<char>>,
}

impl Board {
    pub fn from_ticket(ticket: &GameTicket) -> Self {
        let rows = usize::try_from(ticket.rows).unwrap_or(0);
        let cols = usize::try_from(ticket.cols).unwrap_or(0);

        let mut cells = vec![vec![' '; cols]; rows];
        for (row, line) in ticket.scheme.lines().take(rows).enumerate() {
            let chars: Vec<char> = line.chars().collect();
            for col in 0..cols {
                let symbol = chars.get(col * 2).copied().unwrap_or(' ');
                // keys move around, they come from the snapshot
                cells[row][col] = if symbol == '*' { ' ' } else { symbol };
            }
        }
        Self { rows, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Draws the board with everything the snapshot carries on top of it
    pub fn render(&self, update: &Update) -> String {
        let mut cells = self.cells.clone();
        let mut put = |row: i16, col: i16, symbol: char| {
            if let (Ok(row), Ok(col)) = (usize::try_from(row), usize::try_from(col)) {
                if let Some(cell) = cells.get_mut(row).and_then(|r| r.get_mut(col)) {
                    *cell = symbol;
                }
            }
        };

        for gate in &update.opened_gates {
            put(gate.row, gate.col, '_');
        }
        for key in &update.keys {
            put(key.row, key.col, '*');
        }
        for guardian in &update.guardians {
            put(guardian.row, guardian.col, '@');
        }
        for player in &update.players {
            let symbol = char::from_digit(u32::from(player.slot) + 1, 10).unwrap_or('?');
            put(player.coords.row, player.coords.col, symbol);
        }

        let mut out = String::with_capacity(self.rows * (self.cols * 2 + 1));
        for row in cells {
            let line: Vec<String> = row.iter().map(char::to_string).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out.push_str(&format!("update {}", update.update_num));
        if update.last_move == MoveResult::NotPossible {
            out.push_str(", last move not possible");
        }
        out
    }
}
