//! Control connection to the server

use crate::config::ClientConfig;
use log::info;
use maze_shared::{
    CtrlType, DisconnectOutcome, FrameError, Message, Session, SessionError, SessionState, Status,
};
use std::io;
use std::net::IpAddr;
use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("game channel error: {0}")]
    Frame(#[from] FrameError),
    #[error("game channel refused: {0}")]
    Rejected(String),
    #[error("malformed game ticket")]
    InvalidTicket,
    #[error("not connected to a game")]
    NoGame,
}

/// Session with the server plus typed helpers for every control request.
/// Answers arrive asynchronously through [`ControlConnection::recv`].
pub struct ControlConnection {
    session: Session,
    server_ip: IpAddr,
}

impl ControlConnection {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(&config.server).await?;
        stream.set_nodelay(true)?;
        let server_ip = stream.peer_addr()?.ip();

        let session = Session::connect(stream, config.session(), "control").await?;
        info!("Connected to {}", config.server);
        Ok(Self { session, server_ip })
    }

    /// Address the game channels of this server are reached at
    pub fn server_ip(&self) -> IpAddr {
        self.server_ip
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn send(&self, message: Message) -> Result<(), ClientError> {
        Ok(self.session.send(message)?)
    }

    pub fn request(&self, request: CtrlType, data: Vec<String>) -> Result<(), ClientError> {
        self.send(Message::ctrl(request, Status::Query).with_data(data))
    }

    pub fn login(&self, uid: Option<&str>) -> Result<(), ClientError> {
        let data = uid.map(|uid| vec![uid.to_string()]).unwrap_or_default();
        self.request(CtrlType::LoginOrCreateUser, data)
    }

    pub fn set_nick(&self, nick: &str) -> Result<(), ClientError> {
        self.request(CtrlType::SetNick, vec![nick.to_string()])
    }

    pub fn list_games(&self) -> Result<(), ClientError> {
        self.request(CtrlType::ListGames, Vec::new())
    }

    pub fn list_saves(&self) -> Result<(), ClientError> {
        self.request(CtrlType::ListSaves, Vec::new())
    }

    pub fn create_game(&self, maze: &str) -> Result<(), ClientError> {
        self.request(CtrlType::CreateGame, vec![maze.to_string()])
    }

    pub fn load_game(&self, save: &str) -> Result<(), ClientError> {
        self.request(CtrlType::LoadGame, vec![save.to_string()])
    }

    pub fn save_game(&self, save: &str) -> Result<(), ClientError> {
        self.request(CtrlType::SaveGame, vec![save.to_string()])
    }

    pub fn join_game(&self, game_id: &str) -> Result<(), ClientError> {
        self.request(CtrlType::JoinGame, vec![game_id.to_string()])
    }

    pub fn leave_game(&self) -> Result<(), ClientError> {
        self.request(CtrlType::LeaveGame, Vec::new())
    }

    pub fn restart_game(&self) -> Result<(), ClientError> {
        self.request(CtrlType::RestartGame, Vec::new())
    }

    pub fn terminate_game(&self) -> Result<(), ClientError> {
        self.request(CtrlType::TerminateGame, Vec::new())
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.session.recv().await
    }

    pub async fn disconnect(&mut self) -> DisconnectOutcome {
        self.session.disconnect().await
    }
}
