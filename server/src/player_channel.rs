//! Game channel: the per-instance TCP listener players stream commands over
//!
//! A client proves which actor it is by sending `(CTRL, SYN, UPDATE,
//! [auth_key])` as its first frame. After that the client sends `Command`
//! frames and receives `GamePacket` frames until either side goes away.

use crate::game_instance::GameInstance;
use crate::player::{PlayerActor, PlayerEvent};
use log::{debug, info, warn};
use maze_shared::codec::{self, FrameError};
use maze_shared::{Command, CtrlType, GamePacket, Message, Status, Subtype};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

pub async fn accept_loop(
    instance: Weak<GameInstance>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    auth_timeout: Duration,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let Some(instance) = instance.upgrade() else {
                        break;
                    };
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        serve(instance, stream, addr, shutdown, auth_timeout).await;
                    });
                }
                Err(e) => warn!("game channel accept failed: {}", e),
            }
        }
    }
    debug!("game channel listener closed");
}

/// Waits for the authentication frame and matches it against the instance's actors
async fn authenticate(
    instance: &GameInstance,
    stream: &mut TcpStream,
    auth_timeout: Duration,
) -> Result<Arc<PlayerActor>, String> {
    let hello = match timeout(auth_timeout, codec::read_message(stream)).await {
        Ok(Ok(message)) => message,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => return Err("no authentication in time".to_string()),
    };

    if !hello.is(Subtype::Ctrl(CtrlType::Syn), Status::Update) {
        return Err(format!("expected SYN, got {}", hello));
    }

    let key = hello.first_field().unwrap_or_default();
    instance
        .authenticate(key)
        .ok_or_else(|| "unknown or used key".to_string())
}

async fn serve(
    instance: Arc<GameInstance>,
    mut stream: TcpStream,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
    auth_timeout: Duration,
) {
    let actor = match authenticate(&instance, &mut stream, auth_timeout).await {
        Ok(actor) => actor,
        Err(reason) => {
            warn!("game {}: rejected game connection from {}: {}", instance.id(), addr, reason);
            return;
        }
    };

    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let accepted = GamePacket::Event(Message::ctrl(CtrlType::Syn, Status::Ack));
    if let Err(e) = codec::write_value(&mut writer, &accepted).await {
        warn!("game {}: cannot confirm {}: {}", instance.id(), addr, e);
        instance.leave(&actor);
        actor.notify(PlayerEvent::Disconnected);
        return;
    }

    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    actor.attach(outbox_tx);
    actor.notify(PlayerEvent::Connected);
    info!(
        "game {}: {} connected from {} in slot {}",
        instance.id(),
        actor.nick(),
        addr,
        actor.slot()
    );

    let writer_task = tokio::spawn(write_loop(writer, outbox_rx));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            frame = codec::read_value::<_, Command>(&mut reader) => match frame {
                Ok(command) => {
                    if let Some(result) = instance.handle_command(&actor, command) {
                        actor.push(GamePacket::Answer { command, result });
                    }
                }
                Err(e) if !e.is_fatal() => {
                    warn!("game {}: bad command from {}: {}", instance.id(), actor.nick(), e);
                }
                Err(FrameError::ConnectionClosed) => {
                    debug!("game {}: {} closed the game channel", instance.id(), actor.nick());
                    break;
                }
                Err(e) => {
                    warn!("game {}: game channel of {} failed: {}", instance.id(), actor.nick(), e);
                    break;
                }
            }
        }
    }

    // a stopped game has already told its players
    let stopped = *shutdown.borrow();
    if !stopped && instance.try_leave(&actor).is_some() {
        actor.notify(PlayerEvent::Disconnected);
    }
    actor.detach();
    let _ = writer_task.await;
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbox: mpsc::UnboundedReceiver<GamePacket>) {
    while let Some(packet) = outbox.recv().await {
        if let Err(e) = codec::write_value(&mut writer, &packet).await {
            debug!("game channel write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_instance::tests::game_config;
    use crate::maze::tests::SMALL_MAZE;
    use crate::maze_loader::{InMemoryMazes, MazeLoader};
    use maze_shared::{InfoType, MoveResult};

    fn launch() -> Arc<GameInstance> {
        let loader = InMemoryMazes::new().with("small", SMALL_MAZE);
        let maze = loader.load("small").unwrap();
        GameInstance::launch(
            "g1".to_string(),
            "owner".to_string(),
            maze,
            game_config(),
            Arc::new(loader),
            "127.0.0.1",
        )
        .unwrap()
    }

    async fn connect(instance: &GameInstance, key: &str) -> TcpStream {
        let mut stream = TcpStream::connect(("127.0.0.1", instance.port())).await.unwrap();
        let hello = Message::ctrl(CtrlType::Syn, Status::Update).with_data(vec![key.to_string()]);
        codec::write_message(&mut stream, &hello).await.unwrap();
        stream
    }

    #[tokio::test]
    async fn test_authenticated_player_sends_commands() {
        let instance = launch();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let actor = instance.join("owner", "alice", events_tx).unwrap();

        let mut stream = connect(&instance, actor.auth_key()).await;
        let accepted: GamePacket = codec::read_value(&mut stream).await.unwrap();
        assert_eq!(
            accepted,
            GamePacket::Event(Message::ctrl(CtrlType::Syn, Status::Ack))
        );
        assert_eq!(events.recv().await, Some(PlayerEvent::Connected));

        // garbage is logged and skipped
        codec::write_frame(&mut stream, &[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        codec::write_value(&mut stream, &Command::StartContinue).await.unwrap();
        let answer: GamePacket = codec::read_value(&mut stream).await.unwrap();
        assert_eq!(
            answer,
            GamePacket::Answer {
                command: Command::StartContinue,
                result: MoveResult::Possible
            }
        );

        drop(stream);
        assert_eq!(events.recv().await, Some(PlayerEvent::Disconnected));
        assert!(!instance.is_registered(&actor));
        instance.shutdown();
    }

    #[tokio::test]
    async fn test_key_is_single_use() {
        let instance = launch();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let actor = instance.join("owner", "alice", events_tx).unwrap();

        let mut first = connect(&instance, actor.auth_key()).await;
        let _: GamePacket = codec::read_value(&mut first).await.unwrap();

        let mut second = connect(&instance, actor.auth_key()).await;
        assert!(matches!(
            codec::read_value::<_, GamePacket>(&mut second).await,
            Err(FrameError::ConnectionClosed)
        ));

        let mut bogus = connect(&instance, "bogus").await;
        assert!(codec::read_value::<_, GamePacket>(&mut bogus).await.is_err());
        instance.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_sends_finish_and_closes() {
        let instance = launch();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let actor = instance.join("owner", "alice", events_tx).unwrap();

        let mut stream = connect(&instance, actor.auth_key()).await;
        let _: GamePacket = codec::read_value(&mut stream).await.unwrap();
        assert_eq!(events.recv().await, Some(PlayerEvent::Connected));

        instance.shutdown();
        let mut finished = 0;
        loop {
            match codec::read_value::<_, GamePacket>(&mut stream).await {
                Ok(GamePacket::Event(m)) => {
                    assert!(m.is(Subtype::Info(InfoType::GameFinished), Status::Update), "{}", m);
                    finished += 1;
                }
                Ok(_) => {}
                Err(FrameError::ConnectionClosed) => break,
                Err(e) => panic!("unexpected {}", e),
            }
        }
        assert_eq!(finished, 1);

        // the channel task is done once the socket closed; give it a moment anyway
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            events.try_recv().unwrap(),
            PlayerEvent::Detached(Message::info(InfoType::GameTerminated, Status::Update))
        );
        assert!(events.try_recv().is_err());
    }
}
