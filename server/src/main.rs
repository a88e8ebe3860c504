use clap::Parser;
use log::info;
use mazed::config::ServerConfig;
use mazed::network::Server;
use maze_shared::{DEFAULT_GAME_SPEED_MS, DEFAULT_MAX_PING_MS, DEFAULT_PLAYER_LIVES, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Multiplayer maze game server")]
struct Args {
    /// Address to bind the control port to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Control port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Longest silence tolerated from a client, in milliseconds
    #[arg(long, default_value_t = DEFAULT_MAX_PING_MS)]
    max_ping: u64,

    /// Time to open the game channel after creating or joining a game, in milliseconds
    #[arg(long, default_value_t = 30000)]
    lobby_timeout: u64,

    /// Tick interval of every game, in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_GAME_SPEED_MS)]
    game_speed: u64,

    /// Lives each player starts with
    #[arg(short, long, default_value_t = DEFAULT_PLAYER_LIVES)]
    lives: u8,

    /// Directory with maze definitions
    #[arg(short, long, default_value = "./mazes")]
    mazes_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Tip: Set RUST_LOG=info to see server logs");
    }

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_ping: Duration::from_millis(args.max_ping),
        lobby_timeout: Duration::from_millis(args.lobby_timeout),
        game_speed: Duration::from_millis(args.game_speed),
        player_lives: args.lives,
        mazes_dir: args.mazes_dir,
    }
    .validate()?;

    let server = Server::bind(config).await?;
    let games = server.games();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    games.shutdown_all();
    Ok(())
}
