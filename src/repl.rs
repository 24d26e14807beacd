//! Terminal front end: stdin lines in, streamed transcript out.

use std::io::{self, BufRead, Write};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::{Command, SessionUpdate};
use crate::transcript::{Role, Turn};

const ASSISTANT: &str = "MaggieGPT";

const HELP: &str = "\
Commands:
  /stop     stop the current reply and speech
  /new      start a new chat
  /listen   speak your message
  /speak    read the last message aloud (or stop reading)
  /quit     exit
Anything else is sent as a message.";

#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Command(Command),
    Help,
    Unknown(String),
}

fn parse_line(line: &str) -> LineAction {
    let trimmed = line.trim();
    let Some(name) = trimmed.strip_prefix('/') else {
        return LineAction::Command(Command::Submit(line.to_string()));
    };

    match name {
        "stop" => LineAction::Command(Command::Stop),
        "new" => LineAction::Command(Command::NewChat),
        "listen" | "mic" => LineAction::Command(Command::Listen),
        "speak" => LineAction::Command(Command::ToggleSpeech),
        "quit" | "exit" => LineAction::Command(Command::Quit),
        "help" => LineAction::Help,
        other => LineAction::Unknown(other.to_string()),
    }
}

/// Read stdin on its own OS thread so a pending read never holds up
/// runtime shutdown. The thread is detached and dies with the process.
pub fn spawn_stdin_reader(commands: mpsc::Sender<Command>) -> io::Result<()> {
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || forward_lines(io::stdin().lock(), &commands))?;
    Ok(())
}

/// Forward lines to the session until EOF or `/quit`. Blocking.
fn forward_lines(input: impl BufRead, commands: &mpsc::Sender<Command>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                break;
            }
        };

        match parse_line(&line) {
            LineAction::Command(Command::Quit) => break,
            LineAction::Command(command) => {
                if commands.blocking_send(command).is_err() {
                    return;
                }
            }
            LineAction::Help => println!("{HELP}"),
            LineAction::Unknown(name) => eprintln!("Unknown command /{name} (try /help)"),
        }
    }

    debug!("Input closed");
    let _ = commands.blocking_send(Command::Quit);
}

/// Turns session updates into terminal output, streaming the revealed part
/// of the assistant's reply as it grows.
#[derive(Default)]
pub struct Renderer {
    shown: usize,
}

impl Renderer {
    pub fn render(&mut self, update: &SessionUpdate, out: &mut impl Write) -> io::Result<()> {
        match update {
            SessionUpdate::Hydrated(turns) => {
                for turn in turns {
                    write_turn(turn, out)?;
                }
            }
            SessionUpdate::Greeting(name) => {
                writeln!(out, "Hello, {name}! How can {ASSISTANT} help?")?;
            }
            SessionUpdate::UserTurn(text) => {
                writeln!(out, "You: {text}")?;
            }
            SessionUpdate::Partial(partial) => {
                if self.shown == 0 {
                    write!(out, "{ASSISTANT}: ")?;
                }
                if let Some(fresh) = partial.get(self.shown..) {
                    write!(out, "{fresh}")?;
                }
                self.shown = partial.len();
                out.flush()?;
            }
            SessionUpdate::Completed { reply, image_url } => {
                if self.shown == 0 && reply.is_empty() {
                    writeln!(out, "{ASSISTANT}:")?;
                } else {
                    writeln!(out)?;
                }
                if let Some(url) = image_url {
                    writeln!(out, "[image] {url}")?;
                }
                self.shown = 0;
            }
            SessionUpdate::Stopped => {
                if self.shown > 0 {
                    writeln!(out)?;
                }
                writeln!(out, "[stopped]")?;
                self.shown = 0;
            }
            SessionUpdate::Cleared => {
                writeln!(out, "--- new chat ---")?;
            }
            SessionUpdate::Notice(_) => {}
        }
        Ok(())
    }
}

pub fn write_turn(turn: &Turn, out: &mut impl Write) -> io::Result<()> {
    match turn.role {
        Role::User => writeln!(out, "You: {}", turn.content)?,
        Role::Assistant => writeln!(out, "{ASSISTANT}: {}", turn.content)?,
    }
    if let Some(url) = &turn.image_url {
        writeln!(out, "[image] {url}")?;
    }
    Ok(())
}

/// Print updates until the session closes.
pub async fn render_updates(mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    let mut renderer = Renderer::default();
    while let Some(update) = updates.recv().await {
        if let SessionUpdate::Notice(notice) = &update {
            eprintln!("! {notice}");
            continue;
        }
        let mut stdout = io::stdout().lock();
        if let Err(e) = renderer.render(&update, &mut stdout) {
            debug!("stdout closed: {e}");
            break;
        }
    }
}
