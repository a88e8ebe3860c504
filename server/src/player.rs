//! Per-player simulation state
//!
//! A [`PlayerActor`] is owned by its registry slot (behind an `Arc`). The
//! connection tasks only hold clones of that `Arc` for as long as the actor
//! stays registered. All movement methods take the maze by `&mut` so they can
//! only run while the caller holds the maze lock; the actor's own lock is
//! always taken second.

use crate::maze::{Cell, Direction, Maze};
use maze_shared::{Command, Coords, GamePacket, Message, MoveResult, PlayerPosition};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Anything that occupies a cell of the maze
pub trait Positioned {
    fn coords(&self) -> Coords;

    fn collides_with(&self, other: &impl Positioned) -> bool {
        self.coords() == other.coords()
    }
}

/// Guardians are stored as plain coordinates
impl Positioned for Coords {
    fn coords(&self) -> Coords {
        *self
    }
}

/// Anything that can lose lives
pub trait Damageable {
    fn kill(&self, maze: &mut Maze) -> KillOutcome;
    fn lives(&self) -> u8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Freshly respawned actors can't be hit until they move
    Invulnerable,
    Respawned,
    GameOver,
}

/// Events delivered to the control connection that owns an actor
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Game channel authenticated
    Connected,
    /// Game channel closed or failed
    Disconnected,
    /// Notification to mirror on the control connection
    Notice(Message),
    /// Actor was removed by the instance; the message says why
    Detached(Message),
}

#[derive(Debug)]
struct PlayerState {
    lives: u8,
    coords: Coords,
    start: Coords,
    has_key: bool,
    last_move: MoveResult,
    pending: Option<Command>,
    direction: Direction,
    next_move: Direction,
    invulnerable: bool,
    game_over: bool,
    claimed: bool,
    outbox: Option<mpsc::UnboundedSender<GamePacket>>,
}

impl PlayerState {
    fn fresh(lives: u8) -> Self {
        Self {
            lives,
            coords: Coords::ABSENT,
            start: Coords::ABSENT,
            has_key: false,
            last_move: MoveResult::Possible,
            pending: None,
            direction: Direction::None,
            next_move: Direction::Stop,
            invulnerable: true,
            game_over: false,
            claimed: false,
            outbox: None,
        }
    }
}

#[derive(Debug)]
pub struct PlayerActor {
    uid: String,
    nick: String,
    slot: u8,
    auth_key: String,
    initial_lives: u8,
    events: mpsc::UnboundedSender<PlayerEvent>,
    state: Mutex<PlayerState>,
}

impl PlayerActor {
    pub fn new(
        uid: impl Into<String>,
        nick: impl Into<String>,
        slot: u8,
        auth_key: impl Into<String>,
        lives: u8,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Self {
        Self {
            uid: uid.into(),
            nick: nick.into(),
            slot,
            auth_key: auth_key.into(),
            initial_lives: lives,
            events,
            state: Mutex::new(PlayerState::fresh(lives)),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    /// Places the actor on its start cell with full lives
    pub fn enter(&self, maze: &mut Maze) {
        let start = maze.start(self.slot as usize);
        let mut state = self.state.lock();

        let claimed = state.claimed;
        let outbox = state.outbox.take();
        *state = PlayerState::fresh(self.initial_lives);
        state.claimed = claimed;
        state.outbox = outbox;
        state.start = start;
        state.coords = start;

        maze.add_occupant(start, self.slot);
        maze.players_alive += 1;
    }

    /// Takes the actor off the board, returning any held key to the world
    pub fn exit(&self, maze: &mut Maze) {
        let mut state = self.state.lock();
        if state.coords.is_absent() {
            return;
        }

        if state.has_key && maze.drop_key(state.coords).is_some() {
            state.has_key = false;
        }
        maze.remove_occupant(state.coords, self.slot);
        if !state.game_over {
            maze.players_alive = maze.players_alive.saturating_sub(1);
        }
        state.coords = Coords::ABSENT;
        state.game_over = true;
    }

    /// Buffers a movement command for the next tick, replacing any earlier one
    pub fn set_command(&self, command: Command) {
        self.state.lock().pending = Some(command);
    }

    /// Applies the buffered command. Returns true when the actor ends up on the target.
    pub fn update(&self, maze: &mut Maze) -> bool {
        let mut state = self.state.lock();
        let command = state.pending.take();

        if state.game_over {
            state.last_move = MoveResult::NotPossible;
            return false;
        }

        state.last_move = MoveResult::NotPossible;

        match command {
            Some(Command::Stop) => {
                state.last_move = MoveResult::Possible;
                state.next_move = Direction::Stop;
            }
            Some(Command::TakeOpen) => {
                let result = self.take_or_open(&mut state, maze);
                state.last_move = result;
            }
            // applied when received
            Some(Command::StartContinue) | Some(Command::Pause) => {}
            Some(movement) => {
                if let Some(direction) = Direction::from_command(movement) {
                    if maze.is_move_possible(state.coords, direction) {
                        self.step(&mut state, maze, direction);
                        state.last_move = MoveResult::Possible;
                        state.next_move = direction;
                    } else if state.direction != direction {
                        // turning to face an obstacle still counts
                        state.last_move = MoveResult::Possible;
                    }
                    state.direction = direction;
                }
            }
            None => {
                let repeat = state.next_move;
                if maze.is_move_possible(state.coords, repeat) {
                    self.step(&mut state, maze, repeat);
                } else {
                    state.next_move = Direction::Stop;
                }
                state.last_move = MoveResult::Possible;
            }
        }

        maze.cell(state.coords) == Cell::Target
    }

    fn step(&self, state: &mut PlayerState, maze: &mut Maze, direction: Direction) {
        if matches!(direction, Direction::Stop | Direction::None) {
            return;
        }

        maze.remove_occupant(state.coords, self.slot);
        state.coords = maze.neighbour(state.coords, direction);
        maze.add_occupant(state.coords, self.slot);
        state.invulnerable = false;
    }

    fn take_or_open(&self, state: &mut PlayerState, maze: &mut Maze) -> MoveResult {
        if matches!(state.direction, Direction::Stop | Direction::None) {
            return MoveResult::NotPossible;
        }

        let ahead = maze.neighbour(state.coords, state.direction);
        let done = if state.has_key {
            let opened = maze.open_gate(ahead);
            if opened {
                state.has_key = false;
            }
            opened
        } else {
            let taken = maze.take_key(ahead);
            if taken {
                state.has_key = true;
            }
            taken
        };

        if done {
            MoveResult::Possible
        } else {
            MoveResult::NotPossible
        }
    }

    pub fn position(&self) -> PlayerPosition {
        let state = self.state.lock();
        PlayerPosition {
            slot: self.slot,
            coords: if state.game_over {
                Coords::ABSENT
            } else {
                state.coords
            },
        }
    }

    pub fn last_move(&self) -> MoveResult {
        self.state.lock().last_move
    }

    pub fn has_key(&self) -> bool {
        self.state.lock().has_key
    }

    pub fn is_invulnerable(&self) -> bool {
        self.state.lock().invulnerable
    }

    pub fn is_game_over(&self) -> bool {
        self.state.lock().game_over
    }

    /// Consumes the one-time game channel key
    pub fn claim(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        if state.claimed || key != self.auth_key {
            return false;
        }
        state.claimed = true;
        true
    }

    pub fn is_claimed(&self) -> bool {
        self.state.lock().claimed
    }

    /// Connects the game channel writer
    pub fn attach(&self, outbox: mpsc::UnboundedSender<GamePacket>) {
        self.state.lock().outbox = Some(outbox);
    }

    pub fn detach(&self) {
        self.state.lock().outbox = None;
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().outbox.is_some()
    }

    /// Sends a packet down the game channel, if one is attached
    pub fn push(&self, packet: GamePacket) -> bool {
        let mut state = self.state.lock();
        let Some(outbox) = state.outbox.as_ref() else {
            return false;
        };
        if outbox.send(packet).is_err() {
            state.outbox = None;
            return false;
        }
        true
    }

    pub fn notify(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}

impl Positioned for PlayerActor {
    fn coords(&self) -> Coords {
        self.state.lock().coords
    }
}

impl Damageable for PlayerActor {
    fn kill(&self, maze: &mut Maze) -> KillOutcome {
        let mut state = self.state.lock();
        if state.invulnerable || state.game_over {
            return KillOutcome::Invulnerable;
        }

        if state.has_key && maze.drop_key(state.coords).is_some() {
            state.has_key = false;
        }

        maze.remove_occupant(state.coords, self.slot);
        state.lives = state.lives.saturating_sub(1);
        state.next_move = Direction::Stop;
        state.pending = None;

        if state.lives > 0 {
            state.coords = state.start;
            state.invulnerable = true;
            maze.add_occupant(state.coords, self.slot);
            KillOutcome::Respawned
        } else {
            state.game_over = true;
            maze.players_alive = maze.players_alive.saturating_sub(1);
            KillOutcome::GameOver
        }
    }

    fn lives(&self) -> u8 {
        self.state.lock().lives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maze::tests::small_maze;
    use maze_shared::InfoType;
    use maze_shared::Status;

    fn actor(slot: u8) -> (PlayerActor, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PlayerActor::new("uid", "tester", slot, "secret", 3, tx), rx)
    }

    fn place(actor: &PlayerActor, maze: &mut Maze, at: Coords, facing: Direction) {
        let mut state = actor.state.lock();
        maze.remove_occupant(state.coords, actor.slot);
        state.coords = at;
        state.direction = facing;
        maze.add_occupant(at, actor.slot);
    }

    fn run(actor: &PlayerActor, maze: &mut Maze, command: Command) -> bool {
        actor.set_command(command);
        actor.update(maze)
    }

    #[test]
    fn test_enter_places_on_start() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);

        player.enter(&mut maze);
        assert_eq!(player.coords(), Coords::new(0, 0));
        assert_eq!(maze.occupants(Coords::new(0, 0)), &[0]);
        assert_eq!(maze.players_alive, 1);
        assert!(player.is_invulnerable());
        assert_eq!(player.lives(), 3);
    }

    #[test]
    fn test_move_and_turn() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);

        run(&player, &mut maze, Command::Down);
        assert_eq!(player.coords(), Coords::new(1, 0));
        assert_eq!(player.last_move(), MoveResult::Possible);
        assert!(!player.is_invulnerable());
        assert!(maze.occupants(Coords::new(0, 0)).is_empty());

        // wall at (1,1): turning is fine, pushing again is not
        run(&player, &mut maze, Command::Right);
        assert_eq!(player.coords(), Coords::new(1, 0));
        assert_eq!(player.last_move(), MoveResult::Possible);

        run(&player, &mut maze, Command::Right);
        assert_eq!(player.last_move(), MoveResult::NotPossible);
    }

    #[test]
    fn test_repeat_until_blocked() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);
        place(&player, &mut maze, Coords::new(2, 0), Direction::None);

        run(&player, &mut maze, Command::Right);
        assert_eq!(player.coords(), Coords::new(2, 1));

        // closed gate at (2,2) stops the repeated move
        player.update(&mut maze);
        assert_eq!(player.coords(), Coords::new(2, 1));
        assert_eq!(player.last_move(), MoveResult::Possible);

        player.update(&mut maze);
        assert_eq!(player.coords(), Coords::new(2, 1));
    }

    #[test]
    fn test_stop_cancels_repeat() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);

        run(&player, &mut maze, Command::Right);
        player.update(&mut maze);
        assert_eq!(player.coords(), Coords::new(0, 2));

        run(&player, &mut maze, Command::Stop);
        player.update(&mut maze);
        assert_eq!(player.coords(), Coords::new(0, 2));
    }

    #[test]
    fn test_newer_command_replaces_pending() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);

        player.set_command(Command::Right);
        player.set_command(Command::Down);
        player.update(&mut maze);
        assert_eq!(player.coords(), Coords::new(1, 0));
    }

    #[test]
    fn test_wraps_around_edge() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);

        run(&player, &mut maze, Command::Up);
        assert_eq!(player.coords(), Coords::new(4, 0));
    }

    #[test]
    fn test_take_key_and_open_gate() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);
        place(&player, &mut maze, Coords::new(3, 0), Direction::None);

        // not facing anything
        run(&player, &mut maze, Command::TakeOpen);
        assert_eq!(player.last_move(), MoveResult::NotPossible);

        // the key blocks the move, so this only turns
        run(&player, &mut maze, Command::Right);
        assert_eq!(player.coords(), Coords::new(3, 0));

        run(&player, &mut maze, Command::TakeOpen);
        assert_eq!(player.last_move(), MoveResult::Possible);
        assert!(player.has_key());
        assert_eq!(maze.cell(Coords::new(3, 1)), Cell::Empty);
        assert!(maze.keys().is_empty());

        place(&player, &mut maze, Coords::new(2, 3), Direction::Left);
        run(&player, &mut maze, Command::TakeOpen);
        assert_eq!(player.last_move(), MoveResult::Possible);
        assert!(!player.has_key());
        assert_eq!(maze.cell(Coords::new(2, 2)), Cell::GateOpen);

        run(&player, &mut maze, Command::Left);
        assert_eq!(player.coords(), Coords::new(2, 2));
    }

    #[test]
    fn test_gate_scenario_without_and_with_key() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);
        let gate = Coords::new(2, 2);

        place(&player, &mut maze, Coords::new(2, 3), Direction::Left);
        run(&player, &mut maze, Command::TakeOpen);
        assert_eq!(player.last_move(), MoveResult::NotPossible);
        assert_eq!(maze.cell(gate), Cell::GateClosed);

        // the gate is opened some other way and a key ends up on it
        assert!(maze.open_gate(gate));
        maze.drop_key(gate);
        run(&player, &mut maze, Command::TakeOpen);
        assert!(player.has_key());
        assert_eq!(maze.cell(gate), Cell::GateOpen);

        run(&player, &mut maze, Command::TakeOpen);
        assert_eq!(player.last_move(), MoveResult::NotPossible);
        assert!(player.has_key());
        assert_eq!(maze.cell(gate), Cell::GateOpen);
    }

    #[test]
    fn test_reaching_target_wins() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);
        place(&player, &mut maze, Coords::new(3, 2), Direction::None);

        assert!(run(&player, &mut maze, Command::Right));
    }

    #[test]
    fn test_kill_drops_key_and_respawns() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);

        // still invulnerable after entering
        assert_eq!(player.kill(&mut maze), KillOutcome::Invulnerable);
        assert_eq!(player.lives(), 3);

        run(&player, &mut maze, Command::Right);
        let gate = Coords::new(2, 2);
        maze.open_gate(gate);
        place(&player, &mut maze, gate, Direction::Left);
        player.state.lock().has_key = true;

        assert_eq!(player.kill(&mut maze), KillOutcome::Respawned);
        assert_eq!(player.lives(), 2);
        assert!(!player.has_key());
        assert_eq!(maze.cell(gate), Cell::GateDroppedKey);
        assert!(maze.keys().contains(&gate));
        assert_eq!(player.coords(), Coords::new(0, 0));
        assert!(maze.occupants(gate).is_empty());
        assert!(player.is_invulnerable());
    }

    #[test]
    fn test_kill_until_game_over() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);

        for expected in [KillOutcome::Respawned, KillOutcome::Respawned, KillOutcome::GameOver] {
            run(&player, &mut maze, Command::Right);
            assert_eq!(player.kill(&mut maze), expected);
        }

        assert!(player.is_game_over());
        assert_eq!(maze.players_alive, 0);
        assert_eq!(player.position().coords, Coords::ABSENT);
        assert!(maze.occupants(Coords::new(0, 0)).is_empty());

        // dead actors don't move
        assert!(!run(&player, &mut maze, Command::Down));
        assert_eq!(player.last_move(), MoveResult::NotPossible);
    }

    #[test]
    fn test_exit_returns_key() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);
        player.state.lock().has_key = true;

        player.exit(&mut maze);
        assert_eq!(maze.players_alive, 0);
        assert_eq!(maze.cell(Coords::new(0, 0)), Cell::Key);
        assert!(maze.occupants(Coords::new(0, 0)).is_empty());
    }

    #[test]
    fn test_claim_is_one_time() {
        let (player, _rx) = actor(1);
        assert!(!player.claim("wrong"));
        assert!(player.claim("secret"));
        assert!(!player.claim("secret"));
        assert!(player.is_claimed());
    }

    #[test]
    fn test_push_requires_outbox() {
        let (player, mut events) = actor(0);
        let packet = GamePacket::Event(Message::info(InfoType::PlayerJoined, Status::Update));

        assert!(!player.push(packet.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        player.attach(tx);
        assert!(player.push(packet.clone()));
        assert_eq!(rx.try_recv().unwrap(), packet);

        drop(rx);
        assert!(!player.push(packet));
        assert!(!player.is_attached());

        player.notify(PlayerEvent::Connected);
        assert_eq!(events.try_recv().unwrap(), PlayerEvent::Connected);
    }

    #[test]
    fn test_guardian_collision() {
        let mut maze = small_maze();
        let (player, _rx) = actor(0);
        player.enter(&mut maze);
        place(&player, &mut maze, Coords::new(4, 4), Direction::None);

        assert!(maze.guardians().iter().any(|g| player.collides_with(g)));
    }
}
