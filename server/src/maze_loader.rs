//! Sources of maze definitions

use crate::maze::{Maze, MazeError};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Hands out fully populated mazes by name
pub trait MazeLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Maze, MazeError>;

    /// Names that `load` accepts, sorted
    fn list(&self) -> Vec<String>;
}

/// Reads `<dir>/<name>` from disk on every load
#[derive(Debug, Clone)]
pub struct MazeDirectory {
    dir: PathBuf,
}

impl MazeDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Maze names are plain file names; anything that could walk out of the directory is refused
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
}

impl MazeLoader for MazeDirectory {
    fn load(&self, name: &str) -> Result<Maze, MazeError> {
        if !is_plain_name(name) {
            return Err(MazeError::NotFound(name.to_string()));
        }

        let path = self.dir.join(name);
        let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MazeError::NotFound(name.to_string()),
            _ => MazeError::Unreadable {
                name: name.to_string(),
                reason: e.to_string(),
            },
        })?;

        debug!("loading maze {}", path.display());
        Maze::from_scheme(name, &text)
    }

    fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot list mazes in {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_plain_name(name))
            .collect();
        names.sort();
        names
    }
}

/// Fixed set of maze texts, parsed on each load
#[derive(Debug, Clone, Default)]
pub struct InMemoryMazes {
    mazes: BTreeMap<String, String>,
}

impl InMemoryMazes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.mazes.insert(name.into(), text.into());
        self
    }
}

impl MazeLoader for InMemoryMazes {
    fn load(&self, name: &str) -> Result<Maze, MazeError> {
        let text = self
            .mazes
            .get(name)
            .ok_or_else(|| MazeError::NotFound(name.to_string()))?;
        Maze::from_scheme(name, text)
    }

    fn list(&self) -> Vec<String> {
        self.mazes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maze::tests::SMALL_MAZE;

    #[test]
    fn test_in_memory_loader() {
        let loader = InMemoryMazes::new()
            .with("small", SMALL_MAZE)
            .with("broken", "version=1\n");

        assert_eq!(loader.list(), vec!["broken".to_string(), "small".to_string()]);
        assert_eq!(loader.load("small").unwrap().rows(), 5);
        assert_eq!(loader.load("broken"), Err(MazeError::Header("size")));
        assert!(matches!(loader.load("nope"), Err(MazeError::NotFound(_))));
    }

    #[test]
    fn test_directory_loader() {
        let dir = std::env::temp_dir().join(format!("mazed-loader-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("small.maze"), SMALL_MAZE).unwrap();
        fs::write(dir.join(".hidden"), SMALL_MAZE).unwrap();

        let loader = MazeDirectory::new(&dir);
        assert_eq!(loader.list(), vec!["small.maze".to_string()]);
        assert_eq!(loader.load("small.maze").unwrap().name(), "small.maze");
        assert!(matches!(
            loader.load("missing.maze"),
            Err(MazeError::NotFound(_))
        ));
        assert!(matches!(
            loader.load("../small.maze"),
            Err(MazeError::NotFound(_))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }
}
