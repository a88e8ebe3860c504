//! Game channel client: authenticates with a ticket, then streams commands
//! out and packets in

use crate::connection::ClientError;
use log::{debug, info, warn};
use maze_shared::codec;
use maze_shared::{
    Command, CtrlType, ErrorType, GamePacket, GameTicket, Message, Status, Subtype,
};
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Marks the end of the game channel in the packet stream
pub fn closed_notice(reason: impl Into<String>) -> GamePacket {
    GamePacket::Event(
        Message::error(ErrorType::ClosedConnection, Status::GameLocal)
            .with_data(vec![reason.into()]),
    )
}

pub struct GameConnection {
    game_id: String,
    commands: mpsc::UnboundedSender<Command>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl GameConnection {
    /// Connects to the game channel of `ticket` and authenticates.
    /// Every packet received afterwards is forwarded to `packets`.
    pub async fn open(
        server_ip: IpAddr,
        ticket: &GameTicket,
        auth_timeout: Duration,
        packets: mpsc::UnboundedSender<GamePacket>,
    ) -> Result<Self, ClientError> {
        let mut stream = TcpStream::connect((server_ip, ticket.port)).await?;
        stream.set_nodelay(true)?;

        let hello = Message::ctrl(CtrlType::Syn, Status::Update)
            .with_data(vec![ticket.auth_key.clone()]);
        codec::write_message(&mut stream, &hello).await?;

        let answer = timeout(auth_timeout, codec::read_value::<_, GamePacket>(&mut stream))
            .await
            .map_err(|_| ClientError::Rejected("no answer in time".to_string()))??;
        match answer {
            GamePacket::Event(m) if m.is(Subtype::Ctrl(CtrlType::Syn), Status::Ack) => {}
            other => return Err(ClientError::Rejected(format!("unexpected {:?}", other))),
        }
        info!("Joined game {} on port {}", ticket.game_id, ticket.port);

        let (reader, writer) = stream.into_split();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        Ok(Self {
            game_id: ticket.game_id.clone(),
            commands,
            reader: tokio::spawn(read_loop(reader, packets)),
            writer: tokio::spawn(write_loop(writer, commands_rx)),
        })
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::NoGame)
    }

    /// Flushes queued commands, then closes both directions
    pub async fn close(self) {
        drop(self.commands);
        if let Err(e) = self.writer.await {
            warn!("game channel writer failed: {}", e);
        }
        self.reader.abort();
        let _ = self.reader.await;
        debug!("game channel of {} closed", self.game_id);
    }
}

async fn read_loop(mut reader: OwnedReadHalf, packets: mpsc::UnboundedSender<GamePacket>) {
    loop {
        match codec::read_value::<_, GamePacket>(&mut reader).await {
            Ok(packet) => {
                if packets.send(packet).is_err() {
                    break;
                }
            }
            Err(e) if !e.is_fatal() => warn!("dropping bad game packet: {}", e),
            Err(e) => {
                let _ = packets.send(closed_notice(e.to_string()));
                break;
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        if let Err(e) = codec::write_value(&mut writer, &command).await {
            warn!("cannot send {:?}: {}", command, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
