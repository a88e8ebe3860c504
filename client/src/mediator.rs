//! Glue between the user interface, the control connection and the game channel
//!
//! The [`Mediator`] runs one task that waits on three sources at once: the
//! control session, packets from the game channel and actions from the user.
//! It owns the game channel and opens or closes it as the control answers
//! come in.

use crate::config::ClientConfig;
use crate::connection::{ClientError, ControlConnection};
use crate::game_connection::GameConnection;
use crate::render::{self, Board};
use log::{debug, info, warn};
use maze_shared::{
    Command, CtrlType, ErrorType, GameInfo, GamePacket, GameTicket, InfoType, Kind, Message,
    Status, Subtype, Update,
};
use std::str::FromStr;
use tokio::sync::mpsc;

/// Something the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Login(Option<String>),
    SetNick(String),
    ListGames,
    ListSaves,
    CreateGame(String),
    LoadGame(String),
    SaveGame(String),
    JoinGame(String),
    LeaveGame,
    RestartGame,
    TerminateGame,
    /// Sent on the game channel
    Play(Command),
    /// Open a new control connection after the previous one was lost
    Connect,
    Quit,
}

impl FromStr for UserAction {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next().map(str::to_string);
        let required = |what: &str| arg.clone().ok_or_else(|| format!("{} needs a {}", verb, what));

        let action = match verb.as_str() {
            "login" => UserAction::Login(arg.clone()),
            "nick" => UserAction::SetNick(required("nickname")?),
            "games" | "list" => UserAction::ListGames,
            "saves" => UserAction::ListSaves,
            "create" => UserAction::CreateGame(required("maze name")?),
            "load" => UserAction::LoadGame(required("save name")?),
            "save" => UserAction::SaveGame(required("save name")?),
            "join" => UserAction::JoinGame(required("game id")?),
            "leave" => UserAction::LeaveGame,
            "restart" => UserAction::RestartGame,
            "terminate" => UserAction::TerminateGame,
            "start" | "continue" => UserAction::Play(Command::StartContinue),
            "pause" => UserAction::Play(Command::Pause),
            "w" | "up" => UserAction::Play(Command::Up),
            "s" | "down" => UserAction::Play(Command::Down),
            "a" | "left" => UserAction::Play(Command::Left),
            "d" | "right" => UserAction::Play(Command::Right),
            "x" | "stop" => UserAction::Play(Command::Stop),
            "e" | "take" | "open" => UserAction::Play(Command::TakeOpen),
            "connect" => UserAction::Connect,
            "quit" | "exit" => UserAction::Quit,
            "" => return Err("empty command".to_string()),
            other => return Err(format!("unknown command `{}`", other)),
        };
        Ok(action)
    }
}

/// Output side of the client
pub trait UserInterface {
    /// Text line for the user: answers, notifications and errors
    fn notify(&mut self, text: &str);

    fn show_games(&mut self, games: &[GameInfo]) {
        self.notify(&render::describe_games(games));
    }

    fn game_opened(&mut self, ticket: &GameTicket) {
        self.notify(&format!(
            "joined game {} ({}x{})",
            ticket.game_id, ticket.rows, ticket.cols
        ));
    }

    fn show_update(&mut self, board: &Board, update: &Update) {
        self.notify(&board.render(update));
    }

    fn game_closed(&mut self) {}
}

/// Why the mediator stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Quit,
    ConnectionLost,
}

enum Flow {
    Continue,
    Stop(Exit),
}

enum Input {
    Message(Message),
    Packet(GamePacket),
    Action(UserAction),
    Closed,
}

pub struct Mediator<U: UserInterface> {
    control: ControlConnection,
    config: ClientConfig,
    ui: U,
    game: Option<(GameConnection, Board)>,
    packets_tx: mpsc::UnboundedSender<GamePacket>,
    packets_rx: mpsc::UnboundedReceiver<GamePacket>,
}

impl<U: UserInterface> Mediator<U> {
    pub fn new(control: ControlConnection, config: ClientConfig, ui: U) -> Self {
        let (packets_tx, packets_rx) = mpsc::unbounded_channel();
        Self {
            control,
            config,
            ui,
            game: None,
            packets_tx,
            packets_rx,
        }
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn is_playing(&self) -> bool {
        self.game.is_some()
    }

    /// Serves until the user quits or the control connection ends
    pub async fn run(
        mut self,
        actions: &mut mpsc::UnboundedReceiver<UserAction>,
    ) -> Result<(Exit, U), ClientError> {
        if let Some(nick) = self.config.nick.clone() {
            self.control.set_nick(&nick)?;
        }

        let exit = loop {
            let input = tokio::select! {
                message = self.control.recv() => match message {
                    Some(message) => Input::Message(message),
                    None => Input::Closed,
                },
                Some(packet) = self.packets_rx.recv() => Input::Packet(packet),
                action = actions.recv() => Input::Action(action.unwrap_or(UserAction::Quit)),
            };

            let flow = match input {
                Input::Message(message) => self.on_message(message).await,
                Input::Packet(packet) => self.on_packet(packet).await,
                Input::Action(action) => self.on_action(action),
                Input::Closed => Flow::Stop(Exit::ConnectionLost),
            };
            if let Flow::Stop(exit) = flow {
                break exit;
            }
        };

        self.close_game().await;
        self.control.disconnect().await;
        Ok((exit, self.ui))
    }

    fn on_action(&mut self, action: UserAction) -> Flow {
        let sent = match action {
            UserAction::Login(uid) => self.control.login(uid.as_deref()),
            UserAction::SetNick(nick) => self.control.set_nick(&nick),
            UserAction::ListGames => self.control.list_games(),
            UserAction::ListSaves => self.control.list_saves(),
            UserAction::CreateGame(maze) => self.control.create_game(&maze),
            UserAction::LoadGame(save) => self.control.load_game(&save),
            UserAction::SaveGame(save) => self.control.save_game(&save),
            UserAction::JoinGame(id) => self.control.join_game(&id),
            UserAction::LeaveGame => self.control.leave_game(),
            UserAction::RestartGame => self.control.restart_game(),
            UserAction::TerminateGame => self.control.terminate_game(),
            UserAction::Play(command) => match &self.game {
                Some((game, _)) => game.send(command),
                None => Err(ClientError::NoGame),
            },
            UserAction::Connect => {
                self.ui.notify("already connected");
                Ok(())
            }
            UserAction::Quit => return Flow::Stop(Exit::Quit),
        };

        match sent {
            Ok(()) => Flow::Continue,
            Err(ClientError::NoGame) => {
                self.ui.notify(&ClientError::NoGame.to_string());
                Flow::Continue
            }
            Err(e) => {
                warn!("request failed: {}", e);
                self.ui.notify(&e.to_string());
                Flow::Stop(Exit::ConnectionLost)
            }
        }
    }

    async fn on_message(&mut self, message: Message) -> Flow {
        match message.kind() {
            Kind::Ctrl => self.on_ctrl(message).await,
            Kind::Info => {
                if matches!(
                    message.subtype,
                    Subtype::Info(InfoType::GameFinished) | Subtype::Info(InfoType::GameTerminated)
                ) {
                    self.close_game().await;
                }
                self.ui.notify(&render::describe_info(&message));
                Flow::Continue
            }
            Kind::Error => self.on_error(message),
        }
    }

    async fn on_ctrl(&mut self, message: Message) -> Flow {
        let Subtype::Ctrl(request) = message.subtype else {
            return Flow::Continue;
        };

        match (request, message.status) {
            (CtrlType::Fin, _) => return Flow::Stop(Exit::ConnectionLost),
            (CtrlType::CreateGame | CtrlType::JoinGame, Status::Ack) => {
                self.open_game(&message).await;
            }
            (CtrlType::ListGames, Status::Ack) => {
                let games: Vec<GameInfo> = message
                    .data
                    .iter()
                    .filter_map(|field| GameInfo::decode(field))
                    .collect();
                self.ui.show_games(&games);
            }
            (CtrlType::LeaveGame, Status::Ack) => {
                self.close_game().await;
                self.ui.notify("left the game");
            }
            (CtrlType::LeaveGame, Status::Update) => {
                self.close_game().await;
                self.ui.notify(&format!(
                    "removed from the game: {}",
                    message.first_field().unwrap_or("no reason given")
                ));
            }
            _ => self.ui.notify(&render::describe_answer(request, &message)),
        }
        Flow::Continue
    }

    fn on_error(&mut self, message: Message) -> Flow {
        self.ui.notify(&render::describe_error(&message));

        let Some(error) = message.error_type() else {
            return Flow::Continue;
        };
        if message.status == Status::Update
            && matches!(
                error,
                ErrorType::WrongProtocol
                    | ErrorType::EmptyMessage
                    | ErrorType::MultipleMessages
                    | ErrorType::UnknownError
            )
        {
            if let Err(e) = self.control.send(Message::error(error, Status::Ack)) {
                warn!("cannot acknowledge {:?}: {}", error, e);
            }
        }
        if message.status == Status::Local && render::is_connection_ending(error) {
            return Flow::Stop(Exit::ConnectionLost);
        }
        Flow::Continue
    }

    async fn on_packet(&mut self, packet: GamePacket) -> Flow {
        match packet {
            GamePacket::Update(update) => {
                if let Some((_, board)) = &self.game {
                    self.ui.show_update(board, &update);
                }
            }
            GamePacket::Answer { command, result } => {
                self.ui
                    .notify(&render::describe_command_result(command, result));
            }
            GamePacket::Event(message) if message.status == Status::GameLocal => {
                if self.is_playing() {
                    self.ui.notify(&render::describe_error(&message));
                    self.close_game().await;
                }
            }
            GamePacket::Event(message) => {
                // mirrored on the control connection, shown from there
                debug!("game event {}", message);
            }
        }
        Flow::Continue
    }

    async fn open_game(&mut self, message: &Message) {
        let Some(ticket) = GameTicket::from_data(&message.data) else {
            self.ui.notify(&ClientError::InvalidTicket.to_string());
            return;
        };
        self.close_game().await;

        let opened = GameConnection::open(
            self.control.server_ip(),
            &ticket,
            self.config.max_ping,
            self.packets_tx.clone(),
        )
        .await;

        match opened {
            Ok(game) => {
                info!("playing in game {}", ticket.game_id);
                self.game = Some((game, Board::from_ticket(&ticket)));
                self.ui.game_opened(&ticket);
            }
            Err(e) => {
                warn!("cannot open game channel: {}", e);
                self.ui.notify(&e.to_string());
            }
        }
    }

    async fn close_game(&mut self) {
        if let Some((game, _)) = self.game.take() {
            game.close().await;
            self.ui.game_closed();
        }
    }
}
