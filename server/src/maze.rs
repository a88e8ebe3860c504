//! Maze grid and movement rules
//!
//! The grid is a torus: moving past any edge re-enters on the opposite side.
//! Gate and key coordinates are kept in lists next to the grid so snapshots
//! don't need a full scan; every mutation goes through a method here which
//! updates both at once.

use maze_shared::{Command, Coords, GameStatus, GAME_MAX_PLAYERS};
use thiserror::Error;

pub const MAZE_MIN_SIZE: i16 = 3;
pub const MAZE_MAX_SIZE: i16 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Wall,
    Target,
    GateClosed,
    GateOpen,
    GateDroppedKey,
    Key,
}

impl Cell {
    /// Cells an actor can never step onto
    pub fn blocks_movement(self) -> bool {
        matches!(self, Cell::Wall | Cell::GateClosed | Cell::Key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
    Stop,
    None,
}

impl Direction {
    /// Movement direction for a movement command
    pub fn from_command(command: Command) -> Option<Direction> {
        match command {
            Command::Left => Some(Direction::Left),
            Command::Right => Some(Direction::Right),
            Command::Up => Some(Direction::Up),
            Command::Down => Some(Direction::Down),
            Command::Stop => Some(Direction::Stop),
            Command::TakeOpen | Command::StartContinue | Command::Pause => None,
        }
    }

    fn delta(self) -> Option<(i16, i16)> {
        match self {
            Direction::Left => Some((0, -1)),
            Direction::Right => Some((0, 1)),
            Direction::Up => Some((-1, 0)),
            Direction::Down => Some((1, 0)),
            Direction::Stop | Direction::None => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MazeError {
    #[error("maze {0:?} does not exist")]
    NotFound(String),
    #[error("cannot read maze {name:?}: {reason}")]
    Unreadable { name: String, reason: String },
    #[error("missing or malformed {0} line")]
    Header(&'static str),
    #[error("maze size {rows}x{cols} is out of bounds")]
    Size { rows: i16, cols: i16 },
    #[error("expected {expected} rows, found {found}")]
    RowCount { expected: usize, found: usize },
    #[error("row {row} has {found} characters, expected {expected}")]
    RowLength {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("unknown cell {symbol:?} at {row}:{col}")]
    UnknownCell { row: usize, col: usize, symbol: char },
    #[error("maze has no start position for player 1")]
    NoStart,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Block {
    cell: Cell,
    /// Slots of the actors standing here
    occupants: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Maze {
    name: String,
    version: String,
    rows: i16,
    cols: i16,
    grid: Vec<Block>,
    gates: Vec<Coords>,
    keys: Vec<Coords>,
    starts: [Coords; GAME_MAX_PLAYERS],
    guardians: Vec<Coords>,
    scheme: String,

    pub(crate) game_run: bool,
    pub(crate) started: bool,
    pub(crate) finished: bool,
    pub(crate) players_alive: usize,
}

impl Maze {
    /// Parses a complete maze description:
    ///
    /// ```text
    /// version=1.0
    /// size=5x5
    /// ---------
    /// X X X X X
    /// X 1   * X
    /// ...
    /// ```
    pub fn from_scheme(name: &str, text: &str) -> Result<Maze, MazeError> {
        let mut lines = text.lines();

        let version = lines
            .next()
            .and_then(|l| l.trim_end().strip_prefix("version="))
            .ok_or(MazeError::Header("version"))?
            .to_string();

        let size = lines
            .next()
            .and_then(|l| l.trim_end().strip_prefix("size="))
            .ok_or(MazeError::Header("size"))?;
        let (rows, cols) = size
            .split_once(['x', 'X'])
            .and_then(|(r, c)| Some((r.trim().parse::<i16>().ok()?, c.trim().parse::<i16>().ok()?)))
            .ok_or(MazeError::Header("size"))?;

        lines.next().ok_or(MazeError::Header("delimiter"))?;

        let body: Vec<&str> = lines.take(rows.max(0) as usize).collect();
        let mut maze = Maze::from_rows(name, rows, cols, &body)?;
        maze.version = version;
        Ok(maze)
    }

    /// Builds a maze from its body rows only, each `cols * 2 - 1` characters
    /// wide with cells on even positions.
    pub fn from_rows(name: &str, rows: i16, cols: i16, body: &[&str]) -> Result<Maze, MazeError> {
        if !(MAZE_MIN_SIZE..=MAZE_MAX_SIZE).contains(&rows)
            || !(MAZE_MIN_SIZE..=MAZE_MAX_SIZE).contains(&cols)
        {
            return Err(MazeError::Size { rows, cols });
        }
        if body.len() != rows as usize {
            return Err(MazeError::RowCount {
                expected: rows as usize,
                found: body.len(),
            });
        }

        let width = cols as usize * 2 - 1;
        let mut maze = Maze {
            name: name.to_string(),
            version: String::new(),
            rows,
            cols,
            grid: vec![Block::default(); rows as usize * cols as usize],
            gates: Vec::new(),
            keys: Vec::new(),
            starts: [Coords::ABSENT; GAME_MAX_PLAYERS],
            guardians: Vec::new(),
            scheme: String::new(),
            game_run: false,
            started: false,
            finished: false,
            players_alive: 0,
        };

        let mut scheme_rows = Vec::with_capacity(body.len());
        for (row, line) in body.iter().enumerate() {
            let chars: Vec<char> = line.chars().collect();
            if chars.len() != width {
                return Err(MazeError::RowLength {
                    row,
                    expected: width,
                    found: chars.len(),
                });
            }

            let mut scheme_row = chars.clone();
            for col in 0..cols as usize {
                let symbol = chars[col * 2];
                let at = Coords::new(row as i16, col as i16);
                let cell = match symbol {
                    ' ' => Cell::Empty,
                    'X' => Cell::Wall,
                    'G' => Cell::Target,
                    '~' => {
                        maze.gates.push(at);
                        Cell::GateClosed
                    }
                    '*' => {
                        maze.keys.push(at);
                        Cell::Key
                    }
                    '1'..='4' => {
                        let slot = symbol as usize - '1' as usize;
                        maze.starts[slot] = at;
                        scheme_row[col * 2] = ' ';
                        Cell::Empty
                    }
                    '@' => {
                        maze.guardians.push(at);
                        scheme_row[col * 2] = ' ';
                        Cell::Empty
                    }
                    _ => return Err(MazeError::UnknownCell { row, col, symbol }),
                };
                let index = maze.index(at);
                maze.grid[index].cell = cell;
            }
            scheme_rows.push(scheme_row.into_iter().collect::<String>());
        }

        // Slots without a marker share the first player's start
        let first = maze.starts[0];
        if first.is_absent() {
            return Err(MazeError::NoStart);
        }
        for start in maze.starts.iter_mut().filter(|s| s.is_absent()) {
            *start = first;
        }

        maze.scheme = scheme_rows.join("\n");
        Ok(maze)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rows(&self) -> i16 {
        self.rows
    }

    pub fn cols(&self) -> i16 {
        self.cols
    }

    /// Static layout sent to clients, with start and guardian markers blanked out
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    fn index(&self, at: Coords) -> usize {
        let at = self.wrap(at);
        at.row as usize * self.cols as usize + at.col as usize
    }

    pub fn wrap(&self, at: Coords) -> Coords {
        Coords::new(at.row.rem_euclid(self.rows), at.col.rem_euclid(self.cols))
    }

    /// Cell one step away in `direction`, or `at` itself for STOP/NONE
    pub fn neighbour(&self, at: Coords, direction: Direction) -> Coords {
        match direction.delta() {
            Some((dr, dc)) => self.wrap(Coords::new(at.row + dr, at.col + dc)),
            None => at,
        }
    }

    pub fn cell(&self, at: Coords) -> Cell {
        self.grid[self.index(at)].cell
    }

    pub fn is_move_possible(&self, at: Coords, direction: Direction) -> bool {
        match direction {
            Direction::Stop | Direction::None => true,
            _ => !self.cell(self.neighbour(at, direction)).blocks_movement(),
        }
    }

    /// Picks up the key lying at `at`. A key dropped on an open gate leaves the gate open.
    pub fn take_key(&mut self, at: Coords) -> bool {
        let index = self.index(at);
        let remaining = match self.grid[index].cell {
            Cell::Key => Cell::Empty,
            Cell::GateDroppedKey => Cell::GateOpen,
            _ => return false,
        };

        let at = self.wrap(at);
        self.grid[index].cell = remaining;
        self.keys.retain(|k| *k != at);
        true
    }

    pub fn open_gate(&mut self, at: Coords) -> bool {
        let index = self.index(at);
        if self.grid[index].cell != Cell::GateClosed {
            return false;
        }
        self.grid[index].cell = Cell::GateOpen;
        true
    }

    /// Puts a key back into the world where its holder died. When that cell
    /// cannot hold a key the nearest cell that can is used.
    /// Returns where the key landed, `None` if no cell is free.
    pub fn drop_key(&mut self, at: Coords) -> Option<Coords> {
        let at = self.wrap(at);
        let landing = if self.accepts_key(at) {
            at
        } else {
            (0..self.rows)
                .flat_map(|row| (0..self.cols).map(move |col| Coords::new(row, col)))
                .filter(|c| self.accepts_key(*c))
                .min_by_key(|c| self.distance(at, *c))?
        };

        let index = self.index(landing);
        self.grid[index].cell = match self.grid[index].cell {
            Cell::GateOpen => Cell::GateDroppedKey,
            _ => Cell::Key,
        };
        self.keys.push(landing);
        Some(landing)
    }

    fn accepts_key(&self, at: Coords) -> bool {
        matches!(self.cell(at), Cell::Empty | Cell::GateOpen)
    }

    /// Steps between two cells on the torus
    fn distance(&self, a: Coords, b: Coords) -> i16 {
        let rows = (a.row - b.row).abs();
        let cols = (a.col - b.col).abs();
        rows.min(self.rows - rows) + cols.min(self.cols - cols)
    }

    pub fn add_occupant(&mut self, at: Coords, slot: u8) {
        let index = self.index(at);
        let occupants = &mut self.grid[index].occupants;
        if !occupants.contains(&slot) {
            occupants.push(slot);
        }
    }

    pub fn remove_occupant(&mut self, at: Coords, slot: u8) {
        let index = self.index(at);
        self.grid[index].occupants.retain(|s| *s != slot);
    }

    pub fn occupants(&self, at: Coords) -> &[u8] {
        &self.grid[self.index(at)].occupants
    }

    pub fn start(&self, slot: usize) -> Coords {
        self.starts[slot % GAME_MAX_PLAYERS]
    }

    pub fn guardians(&self) -> &[Coords] {
        &self.guardians
    }

    pub fn keys(&self) -> &[Coords] {
        &self.keys
    }

    pub fn gates(&self) -> &[Coords] {
        &self.gates
    }

    /// Gates that can be walked through, with or without a dropped key on them
    pub fn opened_gates(&self) -> Vec<Coords> {
        self.gates
            .iter()
            .copied()
            .filter(|g| matches!(self.cell(*g), Cell::GateOpen | Cell::GateDroppedKey))
            .collect()
    }

    pub fn status(&self) -> GameStatus {
        if self.finished {
            GameStatus::Finished
        } else if self.game_run {
            GameStatus::Running
        } else if self.started {
            GameStatus::Paused
        } else {
            GameStatus::Lobby
        }
    }
}
