//! One running game: maze, players and the tick loop
//!
//! Lock order everywhere in this module is maze, then registry, then actor.
//! The maze lock is held for a whole tick so that every snapshot sent out
//! describes a single consistent world state.

use crate::config::GameConfig;
use crate::maze::{Maze, MazeError};
use crate::maze_loader::MazeLoader;
use crate::player::{Damageable, KillOutcome, PlayerActor, PlayerEvent, Positioned};
use crate::player_channel;
use crate::players_registry::{PlayersRegistry, Slots};
use log::{debug, info, warn};
use maze_shared::{
    Command, GameInfo, GamePacket, GameStatus, GameTicket, InfoType, Message, MoveResult, Status,
    Update,
};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

const AUTH_KEY_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("game is full")]
    Full,
    #[error("game has finished")]
    Finished,
    #[error("already playing in this game")]
    AlreadyJoined,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("only the owner of the game can do that")]
    NotOwner,
    #[error("game has finished")]
    Finished,
    #[error(transparent)]
    Maze(#[from] MazeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running, nothing changed
    Idle,
    Updated(Update),
    Finished { winners: Vec<String> },
}

pub fn generate_auth_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTH_KEY_LEN)
        .map(char::from)
        .collect()
}

pub struct GameInstance {
    id: String,
    owner: String,
    maze_name: String,
    config: GameConfig,
    loader: Arc<dyn MazeLoader>,
    port: u16,

    /// `None` once the instance has been torn down
    maze: Mutex<Option<Maze>>,
    players: PlayersRegistry,
    update_num: AtomicU64,

    stopping: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl GameInstance {
    fn new(
        id: String,
        owner: String,
        maze: Maze,
        config: GameConfig,
        loader: Arc<dyn MazeLoader>,
        port: u16,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            owner,
            maze_name: maze.name().to_string(),
            config,
            loader,
            port,
            maze: Mutex::new(Some(maze)),
            players: PlayersRegistry::new(),
            update_num: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Opens the player channel listener and starts the tick loop.
    /// Must be called from within a tokio runtime.
    pub fn launch(
        id: String,
        owner: String,
        maze: Maze,
        config: GameConfig,
        loader: Arc<dyn MazeLoader>,
        host: &str,
    ) -> io::Result<Arc<GameInstance>> {
        let listener = std::net::TcpListener::bind((host, 0))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let port = listener.local_addr()?.port();

        let instance = Arc::new(GameInstance::new(id, owner, maze, config, loader, port));

        tokio::spawn(tick_loop(
            Arc::downgrade(&instance),
            instance.id.clone(),
            config.game_speed,
            instance.shutdown.subscribe(),
        ));
        tokio::spawn(player_channel::accept_loop(
            Arc::downgrade(&instance),
            listener,
            instance.shutdown.subscribe(),
            config.max_ping,
        ));

        info!(
            "game {} on maze {} started, players connect on port {}",
            instance.id, instance.maze_name, port
        );
        Ok(instance)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn maze_name(&self) -> &str {
        &self.maze_name
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn used_slots(&self) -> usize {
        self.players.used_slots()
    }

    pub fn status(&self) -> GameStatus {
        match self.maze.lock().as_ref() {
            Some(maze) => maze.status(),
            None => GameStatus::Finished,
        }
    }

    /// Receiver that flips to `true` when the instance shuts down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn info(&self) -> GameInfo {
        let maze = self.maze.lock();
        let slots = self.players.read();
        GameInfo {
            id: self.id.clone(),
            maze_name: self.maze_name.clone(),
            status: maze.as_ref().map_or(GameStatus::Finished, Maze::status),
            used_slots: slots.used() as u8,
            players: slots.iter().map(|a| a.nick().to_string()).collect(),
        }
    }

    /// Registers a new actor in the lowest free slot and puts it on the board
    pub fn join(
        &self,
        uid: &str,
        nick: &str,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Result<Arc<PlayerActor>, JoinError> {
        let mut guard = self.maze.lock();
        let maze = match guard.as_mut() {
            Some(maze) if !maze.finished && !self.is_stopping() => maze,
            _ => return Err(JoinError::Finished),
        };

        if self.players.find(|a| a.uid() == uid).is_some() {
            return Err(JoinError::AlreadyJoined);
        }

        let key = generate_auth_key();
        let lives = self.config.player_lives;
        let actor = self
            .players
            .add_with(|slot| PlayerActor::new(uid, nick, slot, key, lives, events))
            .ok_or(JoinError::Full)?;
        actor.enter(maze);

        let slots = self.players.read();
        info!(
            "game {}: {} joined in slot {} ({}/{})",
            self.id,
            nick,
            actor.slot(),
            slots.used(),
            maze_shared::GAME_MAX_PLAYERS
        );
        self.broadcast(
            &slots,
            Message::info(InfoType::PlayerJoined, Status::Update).with_data(vec![nick.to_string()]),
            Some(actor.slot()),
        );
        Ok(actor)
    }

    pub fn ticket(&self, actor: &PlayerActor) -> Option<GameTicket> {
        let guard = self.maze.lock();
        let maze = guard.as_ref()?;
        Some(GameTicket {
            game_id: self.id.clone(),
            port: self.port,
            auth_key: actor.auth_key().to_string(),
            rows: maze.rows(),
            cols: maze.cols(),
            scheme: maze.scheme().to_string(),
        })
    }

    /// Finds the actor owning a game channel key, consuming the key
    pub fn authenticate(&self, key: &str) -> Option<Arc<PlayerActor>> {
        self.players.find(|a| a.claim(key))
    }

    pub fn is_registered(&self, actor: &Arc<PlayerActor>) -> bool {
        self.players
            .read()
            .get(actor.slot())
            .is_some_and(|stored| Arc::ptr_eq(stored, actor))
    }

    /// Removes an actor from the game. Returns the number of players left.
    pub fn leave(&self, actor: &Arc<PlayerActor>) -> usize {
        self.try_leave(actor).unwrap_or_else(|| self.players.used_slots())
    }

    /// Like `leave`, but `None` when the actor was no longer in the game
    pub fn try_leave(&self, actor: &Arc<PlayerActor>) -> Option<usize> {
        let mut guard = self.maze.lock();
        if !self.is_registered(actor) {
            return None;
        }

        if let Some(maze) = guard.as_mut() {
            actor.exit(maze);
        }
        self.players.remove(actor.slot(), actor);
        actor.detach();

        let slots = self.players.read();
        info!("game {}: {} left, {} remaining", self.id, actor.nick(), slots.used());
        self.broadcast(
            &slots,
            Message::info(InfoType::PlayerLeft, Status::Update)
                .with_data(vec![actor.nick().to_string()]),
            None,
        );
        Some(slots.used())
    }

    /// Applies a command from the game channel. Movement commands are
    /// buffered for the next tick and return `None`; START_CONTINUE and PAUSE
    /// take effect right away and only for the owner.
    pub fn handle_command(&self, actor: &PlayerActor, command: Command) -> Option<MoveResult> {
        if !command.is_admin() {
            actor.set_command(command);
            return None;
        }

        if actor.uid() != self.owner {
            debug!("game {}: {} is not the owner, ignoring {:?}", self.id, actor.nick(), command);
            return Some(MoveResult::NotPossible);
        }

        let mut guard = self.maze.lock();
        let Some(maze) = guard.as_mut().filter(|m| !m.finished) else {
            return Some(MoveResult::NotPossible);
        };

        let result = match command {
            Command::StartContinue => {
                maze.started = true;
                maze.game_run = true;
                MoveResult::Possible
            }
            // players out of lives cannot pause
            Command::Pause if maze.game_run && !actor.is_game_over() => {
                maze.game_run = false;
                MoveResult::Possible
            }
            _ => MoveResult::NotPossible,
        };
        info!("game {} is now {:?}", self.id, maze.status());
        Some(result)
    }

    /// Runs one simulation step and sends the resulting snapshot to every player
    pub fn tick(&self) -> TickOutcome {
        let mut guard = self.maze.lock();
        let Some(maze) = guard.as_mut() else {
            return TickOutcome::Idle;
        };
        if maze.finished || !maze.game_run {
            return TickOutcome::Idle;
        }

        let slots = self.players.read();

        let mut winners = Vec::new();
        for actor in slots.iter() {
            if actor.update(maze) {
                winners.push(actor.nick().to_string());
            }
        }

        if !winners.is_empty() {
            self.finish(maze, &slots, &winners);
            return TickOutcome::Finished { winners };
        }

        let guardians = maze.guardians().to_vec();
        for actor in slots.iter() {
            if !guardians.iter().any(|g| actor.collides_with(g)) {
                continue;
            }
            let info_type = match actor.kill(maze) {
                KillOutcome::Respawned => InfoType::PlayerKilled,
                KillOutcome::GameOver => InfoType::PlayerGameOver,
                KillOutcome::Invulnerable => continue,
            };
            debug!("game {}: {} caught by a guardian", self.id, actor.nick());
            self.broadcast(
                &slots,
                Message::info(info_type, Status::Update).with_data(vec![actor.nick().to_string()]),
                None,
            );
        }

        if slots.used() > 0 && maze.players_alive == 0 {
            self.finish(maze, &slots, &[]);
            return TickOutcome::Finished {
                winners: Vec::new(),
            };
        }

        let update = Update {
            update_num: self.update_num.fetch_add(1, Ordering::SeqCst) + 1,
            last_move: MoveResult::Possible,
            players: slots.iter().map(|a| a.position()).collect(),
            guardians,
            opened_gates: maze.opened_gates(),
            keys: maze.keys().to_vec(),
        };

        for actor in slots.iter() {
            let mut own = update.clone();
            own.last_move = actor.last_move();
            actor.push(GamePacket::Update(own));
        }

        TickOutcome::Updated(update)
    }

    fn finish(&self, maze: &mut Maze, slots: &Slots, winners: &[String]) {
        maze.finished = true;
        maze.game_run = false;

        if winners.is_empty() {
            info!("game {} finished, nobody survived", self.id);
        } else {
            info!("game {} won by {}", self.id, winners.join(", "));
            self.broadcast(
                slots,
                Message::info(InfoType::PlayerWin, Status::Update).with_data(winners.to_vec()),
                None,
            );
        }
    }

    /// Tears the instance down after the last tick
    fn conclude(&self, winners: Vec<String>) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let finished = Message::info(InfoType::GameFinished, Status::Update).with_data(winners);
        self.teardown(finished.clone(), finished);
    }

    /// Stops the game on behalf of `user`. Only the owner may do this.
    pub fn stop(&self, user: &str) -> bool {
        if user != self.owner {
            warn!("game {}: stop requested by non-owner {}", self.id, user);
            return false;
        }
        if self.stopping.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("game {} terminated by its owner", self.id);
        self.teardown(
            Message::info(InfoType::GameFinished, Status::Update),
            Message::info(InfoType::GameTerminated, Status::Update),
        );
        true
    }

    /// Stops the game regardless of owner, for server shutdown and abandoned games
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown(
            Message::info(InfoType::GameFinished, Status::Update),
            Message::info(InfoType::GameTerminated, Status::Update),
        );
    }

    /// Removes every player, releases the maze, then cancels the loops
    fn teardown(&self, game_notice: Message, control_notice: Message) {
        let mut guard = self.maze.lock();
        let actors = self.players.drain();
        for actor in &actors {
            if let Some(maze) = guard.as_mut() {
                actor.exit(maze);
            }
            actor.push(GamePacket::Event(game_notice.clone()));
            actor.detach();
            actor.notify(PlayerEvent::Detached(control_notice.clone()));
        }

        *guard = None;
        drop(guard);
        debug!("game {} released {} players and its maze", self.id, actors.len());

        // player channels wake up only after their player got the notices
        self.shutdown.send_replace(true);
    }

    /// Restarts the maze from its definition, keeping the registered players
    pub fn restart(&self, user: &str) -> Result<(), GameError> {
        if user != self.owner {
            return Err(GameError::NotOwner);
        }
        if self.is_stopping() {
            return Err(GameError::Finished);
        }

        let mut fresh = self.loader.load(&self.maze_name)?;

        let mut guard = self.maze.lock();
        if guard.is_none() {
            return Err(GameError::Finished);
        }

        let slots = self.players.read();
        for actor in slots.iter() {
            actor.enter(&mut fresh);
        }
        *guard = Some(fresh);
        self.update_num.store(0, Ordering::SeqCst);

        info!("game {} restarted", self.id);
        self.broadcast(
            &slots,
            Message::info(InfoType::GameRestarted, Status::Update),
            None,
        );
        Ok(())
    }

    fn broadcast(&self, slots: &Slots, message: Message, except: Option<u8>) {
        for actor in slots.iter().filter(|a| Some(a.slot()) != except) {
            actor.push(GamePacket::Event(message.clone()));
            actor.notify(PlayerEvent::Notice(message.clone()));
        }
    }
}

async fn tick_loop(
    instance: Weak<GameInstance>,
    id: String,
    game_speed: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(game_speed);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // the first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(instance) = instance.upgrade() else {
                    break;
                };
                if let TickOutcome::Finished { winners } = instance.tick() {
                    instance.conclude(winners);
                    return;
                }
            }
        }
    }

    match instance.upgrade() {
        Some(instance) if instance.is_stopping() => debug!("tick loop of game {} cancelled", id),
        _ => warn!("tick loop of game {} cancelled unexpectedly", id),
    }
}
