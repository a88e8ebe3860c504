use clap::Parser;
use log::{info, warn};
use maze_client::config::ClientConfig;
use maze_client::connection::ControlConnection;
use maze_client::mediator::{Exit, Mediator, UserAction, UserInterface};
use maze_shared::{DEFAULT_HELLO_INTERVAL_MS, DEFAULT_MAX_PING_MS, DEFAULT_PORT};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Idle time before a heartbeat is sent, in milliseconds
    #[arg(long, default_value_t = DEFAULT_HELLO_INTERVAL_MS)]
    hello_interval: u64,

    /// Longest wait for the server, in milliseconds
    #[arg(long, default_value_t = DEFAULT_MAX_PING_MS)]
    max_ping: u64,

    /// Nickname to use
    #[arg(short = 'n', long)]
    nick: Option<String>,
}

/// Prints everything to stdout
struct Console;

impl UserInterface for Console {
    fn notify(&mut self, text: &str) {
        println!("{}", text);
    }
}

const HELP: &str = "commands: login [id], nick <name>, games, saves, create <maze>, join <id>, \
                    leave, restart, terminate, start, pause, w/a/s/d, x (stop), e (take/open), \
                    connect, quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        server: args.server,
        hello_interval: Duration::from_millis(args.hello_interval),
        max_ping: Duration::from_millis(args.max_ping),
        nick: args.nick,
    }
    .validate()?;

    let (actions_tx, mut actions) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.parse::<UserAction>() {
                Ok(action) => {
                    if actions_tx.send(action).is_err() {
                        break;
                    }
                }
                Err(e) => println!("{} ({})", e, HELP),
            }
        }
        let _ = actions_tx.send(UserAction::Quit);
    });

    println!("{}", HELP);
    loop {
        info!("Connecting to: {}", config.server);
        match ControlConnection::connect(&config).await {
            Ok(control) => {
                let mediator = Mediator::new(control, config.clone(), Console);
                match mediator.run(&mut actions).await {
                    Ok((Exit::Quit, _)) => break,
                    Ok((Exit::ConnectionLost, _)) => println!("connection lost"),
                    Err(e) => println!("{}", e),
                }
            }
            Err(e) => {
                warn!("Failed to connect: {}", e);
                println!("[local] cannot connect to {}: {}", config.server, e);
            }
        }

        println!("type `connect` to try again or `quit` to exit");
        loop {
            match actions.recv().await {
                Some(UserAction::Connect) => break,
                Some(UserAction::Quit) | None => return Ok(()),
                Some(_) => println!("not connected"),
            }
        }
    }

    Ok(())
}
