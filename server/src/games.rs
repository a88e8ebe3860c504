//! Directory of the game instances running on this server

use crate::config::GameConfig;
use crate::game_instance::GameInstance;
use crate::maze::MazeError;
use crate::maze_loader::MazeLoader;
use log::info;
use maze_shared::GameInfo;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Maze(#[from] MazeError),
    #[error("cannot open game channel: {0}")]
    Io(#[from] io::Error),
}

pub fn generate_game_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

pub struct GameDirectory {
    games: RwLock<HashMap<String, Arc<GameInstance>>>,
    loader: Arc<dyn MazeLoader>,
    config: GameConfig,
    host: String,
}

impl GameDirectory {
    pub fn new(loader: Arc<dyn MazeLoader>, config: GameConfig, host: impl Into<String>) -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            loader,
            config,
            host: host.into(),
        }
    }

    pub fn loader(&self) -> &Arc<dyn MazeLoader> {
        &self.loader
    }

    /// Loads `maze_name` and launches a new instance owned by `owner`
    pub fn create(&self, owner: &str, maze_name: &str) -> Result<Arc<GameInstance>, CreateError> {
        let maze = self.loader.load(maze_name)?;

        let mut games = self.games.write();
        games.retain(|_, game| !game.is_stopping());

        let mut id = generate_game_id();
        while games.contains_key(&id) {
            id = generate_game_id();
        }

        let instance = GameInstance::launch(
            id.clone(),
            owner.to_string(),
            maze,
            self.config,
            Arc::clone(&self.loader),
            &self.host,
        )?;
        games.insert(id, Arc::clone(&instance));
        Ok(instance)
    }

    pub fn get(&self, id: &str) -> Option<Arc<GameInstance>> {
        self.games.read().get(id).cloned()
    }

    /// Running instances, sorted by id. Finished ones are dropped on the way.
    pub fn list(&self) -> Vec<GameInfo> {
        let mut games = self.games.write();
        games.retain(|_, game| !game.is_stopping());

        let mut infos: Vec<GameInfo> = games.values().map(|game| game.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn remove(&self, id: &str) -> Option<Arc<GameInstance>> {
        self.games.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.games.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every instance, used on server shutdown
    pub fn shutdown_all(&self) {
        let games: Vec<Arc<GameInstance>> = self.games.write().drain().map(|(_, g)| g).collect();
        for game in games {
            info!("stopping game {}", game.id());
            game.shutdown();
        }
    }
}
