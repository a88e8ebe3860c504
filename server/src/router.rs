//! Dispatch of control-channel messages
//!
//! Every kind has a fixed table of handlers indexed by subtype. Handlers may
//! change the state of the [`ClientHandler`] and produce at most one answer.

use crate::client_handler::ClientHandler;
use crate::game_instance::GameError;
use crate::games::CreateError;
use log::{debug, info, warn};
use maze_shared::protocol::{CTRL_TYPE_SIZE, ERROR_TYPE_SIZE, INFO_TYPE_SIZE};
use maze_shared::{CtrlType, ErrorType, InfoType, Message, Status, Subtype};

/// What the connection does after a message has been handled
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub message: Option<Message>,
    pub close: bool,
}

impl Reply {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn send(message: Message) -> Self {
        Self {
            message: Some(message),
            close: false,
        }
    }

    pub fn close() -> Self {
        Self {
            message: None,
            close: true,
        }
    }

    pub fn send_and_close(message: Message) -> Self {
        Self {
            message: Some(message),
            close: true,
        }
    }
}

impl From<Option<Message>> for Reply {
    fn from(message: Option<Message>) -> Self {
        Self {
            message,
            close: false,
        }
    }
}

type Handler = fn(&mut ClientHandler, &Message) -> Reply;

const CTRL_HANDLERS: [Handler; CTRL_TYPE_SIZE] = [
    on_syn,
    on_fin,
    on_login,
    on_set_nick,
    saves_unsupported,
    on_list_games,
    on_create_game,
    saves_unsupported,
    saves_unsupported,
    on_join_game,
    on_leave_game,
    on_restart_game,
    on_terminate_game,
];

const INFO_HANDLERS: [Handler; INFO_TYPE_SIZE] = [
    on_hello,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
];

const ERROR_HANDLERS: [Handler; ERROR_TYPE_SIZE] = [
    acknowledge_error,
    acknowledge_error,
    acknowledge_error,
    on_timeout,
    unexpected,
    acknowledge_error,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
    unexpected,
];

/// Hands `message` to the handler registered for its kind and subtype
pub fn route(handler: &mut ClientHandler, message: &Message) -> Reply {
    if matches!(message.status, Status::Local | Status::GameLocal) {
        match message.error_type() {
            Some(ErrorType::Timeout) | Some(ErrorType::ClosedConnection) => {
                info!("[conn {}] {}", handler.conn_id, message)
            }
            _ => debug!("[conn {}] local: {}", handler.conn_id, message),
        }
        return Reply::none();
    }

    let table: &[Handler] = match message.subtype {
        Subtype::Ctrl(_) => &CTRL_HANDLERS,
        Subtype::Info(_) => &INFO_HANDLERS,
        Subtype::Error(_) => &ERROR_HANDLERS,
    };

    match table.get(usize::from(message.subtype.index())) {
        Some(handle) => handle(handler, message),
        None => Reply::send(wrong_protocol()),
    }
}

fn wrong_protocol() -> Message {
    Message::error(ErrorType::WrongProtocol, Status::Update)
}

fn nack(request: CtrlType, reason: impl Into<String>) -> Message {
    Message::ctrl(request, Status::Nack).with_data(vec![reason.into()])
}

fn unexpected(handler: &mut ClientHandler, message: &Message) -> Reply {
    warn!("[conn {}] unexpected {}", handler.conn_id, message);
    Reply::send(wrong_protocol())
}

fn on_syn(handler: &mut ClientHandler, _message: &Message) -> Reply {
    warn!("[conn {}] SYN after handshake", handler.conn_id);
    Reply::send_and_close(wrong_protocol())
}

fn on_fin(handler: &mut ClientHandler, _message: &Message) -> Reply {
    debug!("[conn {}] peer finished", handler.conn_id);
    Reply::close()
}

fn on_login(handler: &mut ClientHandler, message: &Message) -> Reply {
    if handler.is_joined() {
        return Reply::send(Message::error(ErrorType::AlreadyInGame, Status::Update));
    }
    if let Some(uid) = message.first_field().filter(|uid| !uid.is_empty()) {
        handler.uid = uid.to_string();
    }
    Reply::send(
        Message::ctrl(CtrlType::LoginOrCreateUser, Status::Ack)
            .with_data(vec![handler.uid.clone()]),
    )
}

fn on_set_nick(handler: &mut ClientHandler, message: &Message) -> Reply {
    match message.first_field().map(str::trim).filter(|n| !n.is_empty()) {
        Some(nick) => {
            handler.nick = nick.to_string();
            Reply::send(
                Message::ctrl(CtrlType::SetNick, Status::Ack).with_data(vec![nick.to_string()]),
            )
        }
        None => Reply::send(nack(CtrlType::SetNick, "nickname must not be empty")),
    }
}

fn saves_unsupported(_handler: &mut ClientHandler, message: &Message) -> Reply {
    let request = match message.subtype {
        Subtype::Ctrl(request) => request,
        _ => return Reply::send(wrong_protocol()),
    };
    Reply::send(nack(request, "saves are not supported"))
}

fn on_list_games(handler: &mut ClientHandler, _message: &Message) -> Reply {
    let games = handler.games.list().iter().map(|g| g.encode()).collect();
    Reply::send(Message::ctrl(CtrlType::ListGames, Status::Ack).with_data(games))
}

fn on_create_game(handler: &mut ClientHandler, message: &Message) -> Reply {
    if handler.is_joined() {
        return Reply::send(Message::error(ErrorType::AlreadyInGame, Status::Update));
    }
    let Some(maze_name) = message.first_field().filter(|n| !n.is_empty()) else {
        return Reply::send(nack(CtrlType::CreateGame, "no maze given"));
    };

    let instance = match handler.games.create(&handler.uid, maze_name) {
        Ok(instance) => instance,
        Err(CreateError::Maze(e)) => {
            warn!("[conn {}] cannot create game: {}", handler.conn_id, e);
            return Reply::send(
                Message::error(ErrorType::MazeBroken, Status::Update)
                    .with_data(vec![maze_name.to_string()]),
            );
        }
        Err(CreateError::Io(e)) => {
            warn!("[conn {}] cannot create game: {}", handler.conn_id, e);
            return Reply::send(
                Message::error(ErrorType::UnknownError, Status::Update)
                    .with_data(vec![e.to_string()]),
            );
        }
    };

    match handler.enter(instance.clone()) {
        Ok(ticket) => Reply::send(
            Message::ctrl(CtrlType::CreateGame, Status::Ack).with_data(ticket.to_data()),
        ),
        Err(e) => {
            instance.shutdown();
            handler.games.remove(instance.id());
            Reply::send(nack(CtrlType::CreateGame, e.to_string()))
        }
    }
}

fn on_join_game(handler: &mut ClientHandler, message: &Message) -> Reply {
    if handler.is_joined() {
        return Reply::send(Message::error(ErrorType::AlreadyInGame, Status::Update));
    }
    let Some(instance) = message.first_field().and_then(|id| handler.games.get(id)) else {
        return Reply::send(nack(CtrlType::JoinGame, "no such game"));
    };

    match handler.enter(instance) {
        Ok(ticket) => {
            Reply::send(Message::ctrl(CtrlType::JoinGame, Status::Ack).with_data(ticket.to_data()))
        }
        Err(e) => Reply::send(nack(CtrlType::JoinGame, e.to_string())),
    }
}

fn on_leave_game(handler: &mut ClientHandler, _message: &Message) -> Reply {
    if !handler.leave_game() {
        return Reply::send(Message::error(ErrorType::NoJoinedGame, Status::Update));
    }
    Reply::send(Message::ctrl(CtrlType::LeaveGame, Status::Ack))
}

fn on_restart_game(handler: &mut ClientHandler, _message: &Message) -> Reply {
    let Some(joined) = handler.joined.as_ref() else {
        return Reply::send(Message::error(ErrorType::NoJoinedGame, Status::Update));
    };

    match joined.instance.restart(&handler.uid) {
        Ok(()) => Reply::send(Message::ctrl(CtrlType::RestartGame, Status::Ack)),
        Err(GameError::Maze(e)) => {
            warn!("[conn {}] cannot restart: {}", handler.conn_id, e);
            Reply::send(
                Message::error(ErrorType::MazeBroken, Status::Update)
                    .with_data(vec![joined.instance.maze_name().to_string()]),
            )
        }
        Err(e) => Reply::send(nack(CtrlType::RestartGame, e.to_string())),
    }
}

fn on_terminate_game(handler: &mut ClientHandler, _message: &Message) -> Reply {
    let Some(joined) = handler.joined.as_ref() else {
        return Reply::send(Message::error(ErrorType::NoJoinedGame, Status::Update));
    };

    if !joined.instance.stop(&handler.uid) {
        let reason = if joined.instance.owner() == handler.uid {
            GameError::Finished
        } else {
            GameError::NotOwner
        };
        return Reply::send(nack(CtrlType::TerminateGame, reason.to_string()));
    }
    handler.games.remove(joined.instance.id());
    Reply::send(Message::ctrl(CtrlType::TerminateGame, Status::Ack))
}

fn on_hello(handler: &mut ClientHandler, message: &Message) -> Reply {
    if message.status != Status::Update {
        return unexpected(handler, message);
    }
    Reply::send(Message::info(InfoType::Hello, Status::Ack))
}

fn acknowledge_error(handler: &mut ClientHandler, message: &Message) -> Reply {
    if message.status == Status::Ack {
        return Reply::none();
    }
    warn!("[conn {}] peer reported {}", handler.conn_id, message);
    Reply::send(Message::new(message.subtype, Status::Ack))
}

fn on_timeout(handler: &mut ClientHandler, message: &Message) -> Reply {
    if message.status == Status::Ack {
        return Reply::none();
    }
    info!("[conn {}] peer timed out", handler.conn_id);
    Reply::close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_handler::tests::directory;
    use maze_shared::{GameInfo, GameStatus, GameTicket};
    use std::sync::Arc;
    use std::time::Duration;

    fn handler() -> ClientHandler {
        ClientHandler::new(1, directory(), Duration::from_secs(30))
    }

    fn request(ctrl: CtrlType, data: &[&str]) -> Message {
        Message::ctrl(ctrl, Status::Query).with_data(data.iter().map(|s| s.to_string()).collect())
    }

    fn answer(reply: Reply) -> Message {
        assert!(!reply.close);
        reply.message.unwrap()
    }

    #[test]
    fn test_tables_cover_every_subtype() {
        assert_eq!(CTRL_HANDLERS.len(), CtrlType::ALL.len());
        assert_eq!(INFO_HANDLERS.len(), InfoType::ALL.len());
        assert_eq!(ERROR_HANDLERS.len(), ErrorType::ALL.len());
    }

    #[tokio::test]
    async fn test_syn_after_handshake_closes() {
        let mut h = handler();
        let reply = route(&mut h, &request(CtrlType::Syn, &[]));
        assert_eq!(reply, Reply::send_and_close(wrong_protocol()));
    }

    #[tokio::test]
    async fn test_fin_closes_without_answer() {
        let mut h = handler();
        assert_eq!(route(&mut h, &Message::ctrl(CtrlType::Fin, Status::Update)), Reply::close());
    }

    #[tokio::test]
    async fn test_heartbeat_is_acknowledged() {
        let mut h = handler();
        let reply = answer(route(&mut h, &Message::info(InfoType::Hello, Status::Update)));
        assert!(reply.is(Subtype::Info(InfoType::Hello), Status::Ack));

        let reply = answer(route(&mut h, &Message::info(InfoType::Hello, Status::Set)));
        assert_eq!(reply, wrong_protocol());

        let reply = answer(route(&mut h, &Message::info(InfoType::GameFinished, Status::Update)));
        assert_eq!(reply, wrong_protocol());
    }

    #[tokio::test]
    async fn test_errors_from_peer() {
        let mut h = handler();

        let reply = answer(route(&mut h, &Message::error(ErrorType::EmptyMessage, Status::Update)));
        assert!(reply.is(Subtype::Error(ErrorType::EmptyMessage), Status::Ack));

        let acked = route(&mut h, &Message::error(ErrorType::MazeBroken, Status::Ack));
        assert_eq!(acked, Reply::none());

        let timeout = route(&mut h, &Message::error(ErrorType::Timeout, Status::Update));
        assert_eq!(timeout, Reply::close());

        let reply = answer(route(&mut h, &Message::error(ErrorType::NoJoinedGame, Status::Update)));
        assert_eq!(reply, wrong_protocol());
    }

    #[tokio::test]
    async fn test_local_messages_are_not_routed() {
        let mut h = handler();
        let local = Message::local_error(ErrorType::Timeout, "peer timed out");
        assert_eq!(route(&mut h, &local), Reply::none());
    }

    #[tokio::test]
    async fn test_login_and_nick() {
        let mut h = handler();
        let reply = answer(route(&mut h, &request(CtrlType::LoginOrCreateUser, &["alice-id"])));
        assert_eq!(reply.first_field(), Some("alice-id"));
        assert_eq!(h.uid, "alice-id");

        let reply = answer(route(&mut h, &request(CtrlType::LoginOrCreateUser, &[])));
        assert_eq!(reply.first_field(), Some("alice-id"));

        let reply = answer(route(&mut h, &request(CtrlType::SetNick, &["alice"])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::SetNick), Status::Ack));
        assert_eq!(h.nick, "alice");

        let reply = answer(route(&mut h, &request(CtrlType::SetNick, &["  "])));
        assert_eq!(reply.status, Status::Nack);
        assert_eq!(h.nick, "alice");
    }

    #[tokio::test]
    async fn test_saves_are_refused() {
        let mut h = handler();
        for ctrl in [CtrlType::ListSaves, CtrlType::LoadGame, CtrlType::SaveGame] {
            let reply = answer(route(&mut h, &request(ctrl, &["slot"])));
            assert!(reply.is(Subtype::Ctrl(ctrl), Status::Nack));
            assert_eq!(reply.first_field(), Some("saves are not supported"));
        }
    }

    #[tokio::test]
    async fn test_create_list_and_join() {
        let games = directory();
        let mut owner = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let mut guest = ClientHandler::new(2, Arc::clone(&games), Duration::from_secs(30));

        let created = answer(route(&mut owner, &request(CtrlType::CreateGame, &["small"])));
        assert!(created.is(Subtype::Ctrl(CtrlType::CreateGame), Status::Ack));
        let ticket = GameTicket::from_data(&created.data).unwrap();
        assert_eq!((ticket.rows, ticket.cols), (5, 5));

        let again = answer(route(&mut owner, &request(CtrlType::CreateGame, &["small"])));
        assert!(again.is(Subtype::Error(ErrorType::AlreadyInGame), Status::Update));

        let listed = answer(route(&mut guest, &request(CtrlType::ListGames, &[])));
        assert_eq!(listed.data.len(), 1);
        let info = GameInfo::decode(&listed.data[0]).unwrap();
        assert_eq!(info.id, ticket.game_id);
        assert_eq!(info.status, GameStatus::Lobby);
        assert_eq!(info.used_slots, 1);

        let joined = answer(route(&mut guest, &request(CtrlType::JoinGame, &[ticket.game_id.as_str()])));
        assert!(joined.is(Subtype::Ctrl(CtrlType::JoinGame), Status::Ack));
        let guest_ticket = GameTicket::from_data(&joined.data).unwrap();
        assert_eq!(guest_ticket.port, ticket.port);
        assert_ne!(guest_ticket.auth_key, ticket.auth_key);
    }

    #[tokio::test]
    async fn test_create_with_broken_maze() {
        let mut h = handler();
        let reply = answer(route(&mut h, &request(CtrlType::CreateGame, &["nowhere"])));
        assert!(reply.is(Subtype::Error(ErrorType::MazeBroken), Status::Update));
        assert_eq!(reply.first_field(), Some("nowhere"));
        assert!(!h.is_joined());
    }

    #[tokio::test]
    async fn test_join_unknown_game() {
        let mut h = handler();
        let reply = answer(route(&mut h, &request(CtrlType::JoinGame, &["deadbeef"])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::JoinGame), Status::Nack));
    }

    #[tokio::test]
    async fn test_game_requests_without_a_game() {
        let mut h = handler();
        for ctrl in [CtrlType::LeaveGame, CtrlType::RestartGame, CtrlType::TerminateGame] {
            let reply = answer(route(&mut h, &request(ctrl, &[])));
            assert!(reply.is(Subtype::Error(ErrorType::NoJoinedGame), Status::Update));
        }
    }

    #[tokio::test]
    async fn test_only_owner_terminates_and_restarts() {
        let games = directory();
        let mut owner = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let mut guest = ClientHandler::new(2, Arc::clone(&games), Duration::from_secs(30));

        let created = answer(route(&mut owner, &request(CtrlType::CreateGame, &["small"])));
        let game_id = created.data[0].clone();
        answer(route(&mut guest, &request(CtrlType::JoinGame, &[game_id.as_str()])));

        let reply = answer(route(&mut guest, &request(CtrlType::RestartGame, &[])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::RestartGame), Status::Nack));
        let reply = answer(route(&mut owner, &request(CtrlType::RestartGame, &[])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::RestartGame), Status::Ack));

        let reply = answer(route(&mut guest, &request(CtrlType::TerminateGame, &[])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::TerminateGame), Status::Nack));
        assert_eq!(reply.first_field(), Some(GameError::NotOwner.to_string().as_str()));
        assert!(games.get(&game_id).is_some());

        let reply = answer(route(&mut owner, &request(CtrlType::TerminateGame, &[])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::TerminateGame), Status::Ack));
        assert!(games.get(&game_id).is_none());
    }

    #[tokio::test]
    async fn test_terminating_a_stopped_game_says_so() {
        let games = directory();
        let mut owner = ClientHandler::new(1, Arc::clone(&games), Duration::from_secs(30));
        let created = answer(route(&mut owner, &request(CtrlType::CreateGame, &["small"])));
        let instance = games.get(&created.data[0]).unwrap();

        // the game ends before the handler has seen the notice
        instance.shutdown();
        let reply = answer(route(&mut owner, &request(CtrlType::TerminateGame, &[])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::TerminateGame), Status::Nack));
        assert_eq!(reply.first_field(), Some(GameError::Finished.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_leave_game() {
        let mut h = handler();
        answer(route(&mut h, &request(CtrlType::CreateGame, &["small"])));
        let reply = answer(route(&mut h, &request(CtrlType::LeaveGame, &[])));
        assert!(reply.is(Subtype::Ctrl(CtrlType::LeaveGame), Status::Ack));
        assert!(!h.is_joined());
        assert!(h.games.is_empty());
    }
}
