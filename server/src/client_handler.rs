//! One control connection, from handshake to disconnect
//!
//! The handler runs a single task that selects over three inputs: messages
//! from the [`Session`], events from the actor it has joined a game with, and
//! the lobby deadline that guards the opening of the game channel. Requests
//! are answered through [`router::route`], everything else is turned into at
//! most one outbound message here.

use crate::game_instance::{GameInstance, JoinError};
use crate::games::GameDirectory;
use crate::player::{PlayerActor, PlayerEvent};
use crate::router::{self, Reply};
use log::{debug, info, warn};
use maze_shared::{CtrlType, GameTicket, Message, Session, SessionConfig, Status};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

pub fn generate_uid() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// The game a connection is currently playing in
pub(crate) struct JoinedGame {
    pub(crate) instance: Arc<GameInstance>,
    pub(crate) actor: Arc<PlayerActor>,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
    /// Armed until the game channel authenticates
    lobby_deadline: Option<Instant>,
}

enum Input {
    Message(Message),
    Event(PlayerEvent),
    LobbyExpired,
    Closed,
}

pub struct ClientHandler {
    pub(crate) conn_id: u64,
    pub(crate) uid: String,
    pub(crate) nick: String,
    pub(crate) games: Arc<GameDirectory>,
    pub(crate) joined: Option<JoinedGame>,
    lobby_timeout: Duration,
}

impl ClientHandler {
    pub fn new(conn_id: u64, games: Arc<GameDirectory>, lobby_timeout: Duration) -> Self {
        Self {
            conn_id,
            uid: generate_uid(),
            nick: format!("player{}", conn_id),
            games,
            joined: None,
            lobby_timeout,
        }
    }

    /// Accepts the handshake and serves the connection until either side closes it
    pub async fn run(mut self, stream: TcpStream, session: SessionConfig) {
        let tag = format!("conn {}", self.conn_id);
        let mut session = match Session::accept(stream, session, tag.as_str()).await {
            Ok(session) => session,
            Err(e) => {
                warn!("[{}] handshake failed: {}", tag, e);
                return;
            }
        };

        loop {
            let deadline = self.joined.as_ref().and_then(|j| j.lobby_deadline);
            let input = tokio::select! {
                inbound = session.recv() => match inbound {
                    Some(message) => Input::Message(message),
                    None => Input::Closed,
                },
                Some(event) = next_event(&mut self.joined) => Input::Event(event),
                _ = sleep_until_opt(deadline) => Input::LobbyExpired,
            };

            let reply = match input {
                Input::Message(message) => router::route(&mut self, &message),
                Input::Event(event) => Reply::from(self.on_event(event)),
                Input::LobbyExpired => Reply::send(self.on_lobby_expired()),
                Input::Closed => break,
            };

            if let Some(message) = reply.message {
                if let Err(e) = session.send(message) {
                    debug!("[{}] cannot answer: {}", tag, e);
                    break;
                }
            }
            if reply.close {
                break;
            }
        }

        self.leave_game();
        session.disconnect().await;
        info!("[{}] {} disconnected", tag, self.nick);
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.joined.is_some()
    }

    /// Joins `instance` and returns the ticket for its game channel
    pub(crate) fn enter(&mut self, instance: Arc<GameInstance>) -> Result<GameTicket, JoinError> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let actor = instance.join(&self.uid, &self.nick, events_tx)?;

        let Some(ticket) = instance.ticket(&actor) else {
            instance.leave(&actor);
            return Err(JoinError::Finished);
        };

        self.joined = Some(JoinedGame {
            instance,
            actor,
            events,
            lobby_deadline: Some(Instant::now() + self.lobby_timeout),
        });
        Ok(ticket)
    }

    /// Leaves the current game, shutting it down when nobody is left
    pub(crate) fn leave_game(&mut self) -> bool {
        let Some(joined) = self.joined.take() else {
            return false;
        };

        let remaining = joined.instance.leave(&joined.actor);
        if remaining == 0 && !joined.instance.is_stopping() {
            info!("game {} abandoned", joined.instance.id());
            joined.instance.shutdown();
            self.games.remove(joined.instance.id());
        }
        true
    }

    fn on_event(&mut self, event: PlayerEvent) -> Option<Message> {
        match event {
            PlayerEvent::Connected => {
                if let Some(joined) = self.joined.as_mut() {
                    joined.lobby_deadline = None;
                }
                None
            }
            PlayerEvent::Disconnected => {
                if self.joined.is_none() {
                    return None;
                }
                debug!("[conn {}] game channel of {} closed", self.conn_id, self.nick);
                self.leave_game();
                Some(
                    Message::ctrl(CtrlType::LeaveGame, Status::Update)
                        .with_data(vec!["game connection closed".to_string()]),
                )
            }
            PlayerEvent::Notice(message) => Some(message),
            PlayerEvent::Detached(message) => {
                if let Some(joined) = self.joined.take() {
                    self.games.remove(joined.instance.id());
                }
                Some(message)
            }
        }
    }

    fn on_lobby_expired(&mut self) -> Message {
        warn!(
            "[conn {}] {} did not open the game channel in {:?}",
            self.conn_id, self.nick, self.lobby_timeout
        );
        self.leave_game();
        Message::ctrl(CtrlType::LeaveGame, Status::Update)
            .with_data(vec!["game connection was not established".to_string()])
    }
}

async fn next_event(joined: &mut Option<JoinedGame>) -> Option<PlayerEvent> {
    match joined {
        Some(joined) => joined.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game_instance::tests::game_config;
    use crate::maze::tests::SMALL_MAZE;
    use crate::maze_loader::InMemoryMazes;
    use maze_shared::{InfoType, Subtype};

    pub(crate) fn directory() -> Arc<GameDirectory> {
        let loader = InMemoryMazes::new().with("small", SMALL_MAZE);
        Arc::new(GameDirectory::new(Arc::new(loader), game_config(), "127.0.0.1"))
    }

    #[test]
    fn test_uid_is_random_hex() {
        let a = generate_uid();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, generate_uid());
    }

    #[tokio::test]
    async fn test_last_player_leaving_shuts_the_game_down() {
        let games = directory();
        let mut handler = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let instance = games.create(&handler.uid, "small").unwrap();

        handler.enter(Arc::clone(&instance)).unwrap();
        assert!(handler.is_joined());
        assert!(handler.leave_game());
        assert!(!handler.leave_game());

        assert!(instance.is_stopping());
        assert!(games.get(instance.id()).is_none());
    }

    #[tokio::test]
    async fn test_game_keeps_running_while_others_play() {
        let games = directory();
        let mut owner = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let mut guest = ClientHandler::new(2, Arc::clone(&games), Duration::from_secs(30));
        let instance = games.create(&owner.uid, "small").unwrap();

        owner.enter(Arc::clone(&instance)).unwrap();
        guest.enter(Arc::clone(&instance)).unwrap();
        owner.leave_game();

        assert!(!instance.is_stopping());
        assert_eq!(instance.used_slots(), 1);
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let games = directory();
        let mut owner = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let mut guest = ClientHandler::new(2, Arc::clone(&games), Duration::from_secs(30));
        let instance = games.create(&owner.uid, "small").unwrap();
        owner.enter(Arc::clone(&instance)).unwrap();
        guest.enter(Arc::clone(&instance)).unwrap();

        let event = next_event(&mut owner.joined).await.unwrap();
        let forwarded = owner.on_event(event).unwrap();
        assert!(forwarded.is(Subtype::Info(InfoType::PlayerJoined), Status::Update));
        assert_eq!(forwarded.first_field(), Some("player2"));

        assert!(instance.stop(&owner.uid));
        let event = next_event(&mut guest.joined).await.unwrap();
        let forwarded = guest.on_event(event).unwrap();
        assert!(forwarded.is(Subtype::Info(InfoType::GameTerminated), Status::Update));
        assert!(!guest.is_joined());
    }

    #[tokio::test]
    async fn test_closed_channel_after_termination_is_silent() {
        let games = directory();
        let mut handler = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let instance = games.create(&handler.uid, "small").unwrap();
        handler.enter(Arc::clone(&instance)).unwrap();

        assert!(instance.stop(&handler.uid));
        let event = next_event(&mut handler.joined).await.unwrap();
        assert!(handler.on_event(event).is_some());

        assert!(handler.on_event(PlayerEvent::Disconnected).is_none());
        assert!(!handler.is_joined());
    }

    #[tokio::test]
    async fn test_closed_channel_leaves_the_game() {
        let games = directory();
        let mut owner = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let mut guest = ClientHandler::new(2, Arc::clone(&games), Duration::from_secs(30));
        let instance = games.create(&owner.uid, "small").unwrap();
        owner.enter(Arc::clone(&instance)).unwrap();
        guest.enter(Arc::clone(&instance)).unwrap();

        let notice = guest.on_event(PlayerEvent::Disconnected).unwrap();
        assert!(notice.is(Subtype::Ctrl(CtrlType::LeaveGame), Status::Update));
        assert_eq!(notice.first_field(), Some("game connection closed"));
        assert_eq!(instance.used_slots(), 1);
    }

    #[tokio::test]
    async fn test_connected_disarms_lobby_deadline() {
        let games = directory();
        let mut handler = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let instance = games.create(&handler.uid, "small").unwrap();
        handler.enter(instance).unwrap();

        assert!(handler.joined.as_ref().unwrap().lobby_deadline.is_some());
        assert!(handler.on_event(PlayerEvent::Connected).is_none());
        assert!(handler.joined.as_ref().unwrap().lobby_deadline.is_none());
    }

    #[tokio::test]
    async fn test_lobby_expiry_removes_player() {
        let games = directory();
        let mut handler = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let instance = games.create(&handler.uid, "small").unwrap();
        handler.enter(Arc::clone(&instance)).unwrap();

        let notice = handler.on_lobby_expired();
        assert!(notice.is(Subtype::Ctrl(CtrlType::LeaveGame), Status::Update));
        assert_eq!(notice.first_field(), Some("game connection was not established"));
        assert!(!handler.is_joined());
        assert_eq!(instance.used_slots(), 0);
    }
}
