//! Control-channel listener: accepts TCP connections and spawns a handler for each

use crate::client_handler::ClientHandler;
use crate::config::ServerConfig;
use crate::games::GameDirectory;
use crate::maze_loader::{MazeDirectory, MazeLoader};
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Main server accepting control connections
pub struct Server {
    listener: TcpListener,
    games: Arc<GameDirectory>,
    config: ServerConfig,
    next_conn_id: u64,
}

impl Server {
    /// Binds the control port and loads mazes from `config.mazes_dir`
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let loader = Arc::new(MazeDirectory::new(config.mazes_dir.clone()));
        Self::bind_with_loader(config, loader).await
    }

    pub async fn bind_with_loader(
        config: ServerConfig,
        loader: Arc<dyn MazeLoader>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.address()).await?;
        info!("Server listening on {}", listener.local_addr()?);
        info!("{} mazes available", loader.list().len());

        let games = Arc::new(GameDirectory::new(loader, config.game(), config.host.clone()));
        Ok(Self {
            listener,
            games,
            config,
            next_conn_id: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn games(&self) -> Arc<GameDirectory> {
        Arc::clone(&self.games)
    }

    /// Accepts connections until the listener fails
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    self.games.shutdown_all();
                    return Err(e);
                }
            };
            let _ = stream.set_nodelay(true);

            let conn_id = self.next_conn_id;
            self.next_conn_id += 1;
            info!("[conn {}] accepted from {}", conn_id, addr);

            let handler =
                ClientHandler::new(conn_id, Arc::clone(&self.games), self.config.lobby_timeout);
            let session = self.config.session();
            tokio::spawn(handler.run(stream, session));
        }
    }
}
