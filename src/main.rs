//! maggie-chat-rs: terminal chat client for the MaggieGPT API.

mod api;
mod auth;
mod config;
mod error;
mod gateway;
mod notifier;
mod repl;
mod reveal;
mod session;
mod token;
mod transcript;
mod voice;

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::ChatError;
use crate::gateway::{Gateway, HttpGateway};
use crate::notifier::Notifier;
use crate::session::{ChatController, Command, SessionContext};
use crate::token::TokenStore;
use crate::voice::{NoVoice, VoiceBridge};

#[derive(Parser, Debug)]
#[command(name = "maggie-chat-rs", about = "Chat with MaggieGPT from the terminal")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start an interactive chat (default)
    Chat {
        /// Disable speech input and output
        #[arg(long)]
        no_voice: bool,

        /// Also start the local control API
        #[arg(long)]
        serve: bool,
    },
    /// Log in and store the session token
    Login {
        #[arg(short, long)]
        email: String,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
    },
    /// Forget the stored session token
    Logout,
    /// Show the logged-in user's name
    Profile,
    /// Print the saved conversation
    History,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so they don't interleave with the transcript
    let filter = if args.verbose {
        EnvFilter::new("debug,reqwest=info,hyper=info,hyper_util=info")
    } else {
        EnvFilter::new("info,reqwest=warn,hyper=warn,hyper_util=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load(args.config.as_deref());
    let tokens = TokenStore::new(config.auth.token_file());
    let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(&config.api, tokens.clone())?);

    match args.command.unwrap_or(Cmd::Chat {
        no_voice: false,
        serve: false,
    }) {
        Cmd::Chat { no_voice, serve } => {
            if tokens.load().is_none() {
                eprintln!("Not logged in. Run `maggie-chat-rs login --email <email>` first.");
                return Err(ChatError::Unauthorized.into());
            }
            run_chat(config, gateway, no_voice, serve).await;
        }
        Cmd::Login { email } => {
            let password = read_password()?;
            auth::login(gateway.as_ref(), &email, &password).await?;
            println!("Logged in. Run `maggie-chat-rs chat` to start.");
        }
        Cmd::Register { name, email } => {
            let password = read_password()?;
            auth::register(gateway.as_ref(), &name, &email, &password).await?;
            println!("Account created. Run `maggie-chat-rs login --email {email}` next.");
        }
        Cmd::Logout => {
            auth::logout(&tokens)?;
            println!("Logged out.");
        }
        Cmd::Profile => {
            let profile = gateway.profile().await?;
            println!("Hello, {}!", profile.name);
        }
        Cmd::History => {
            let turns = gateway.history().await?;
            let mut stdout = io::stdout().lock();
            for turn in &turns {
                repl::write_turn(turn, &mut stdout)?;
            }
        }
    }

    Ok(())
}

async fn run_chat(config: Config, gateway: Arc<dyn Gateway>, no_voice: bool, serve: bool) {
    let voice: Arc<dyn VoiceBridge> = if no_voice {
        Arc::new(NoVoice)
    } else {
        Arc::from(voice::select(&config.voice))
    };

    let ctx = SessionContext {
        gateway,
        voice,
        notifier: Notifier::new(config.feedback.notifications),
    };
    let mut controller = ChatController::new(ctx, &config);
    let updates = controller.subscribe();
    let (commands_tx, commands_rx) = mpsc::channel::<Command>(32);

    if serve || config.api_server.enabled {
        let api_state = api::ApiState {
            commands: commands_tx.clone(),
            view: controller.watch_view(),
        };
        api::start_api(api_state, config.api_server.port).await;
    }

    let renderer = tokio::spawn(repl::render_updates(updates));
    if let Err(e) = repl::spawn_stdin_reader(commands_tx.clone()) {
        warn!("Failed to start input reader: {e}");
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = commands_tx.send(Command::Quit).await;
        }
    });

    println!("Type a message, or /help for commands.");
    controller.run(commands_rx).await;
    let _ = renderer.await;
    info!("Bye");
}

/// Password from MAGGIE_PASSWORD, else one line from stdin.
fn read_password() -> Result<String, ChatError> {
    if let Ok(password) = std::env::var("MAGGIE_PASSWORD") {
        return Ok(password);
    }

    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
