//! Interactive terminal chat.
//!
//! Lines starting with `/` are commands; anything else is sent as a chat
//! message. Answer text streams to stdout as it arrives, reasoning is shown
//! dimmed.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::ContextMode;
use crate::reasoning::Segment;
use crate::session::{Services, Session};

const HELP: &str = "\
Commands:
  /models          list configured models
  /model <name>    switch model (history is kept)
  /upload <path>   add a .txt, .md, .json, .docx or .pdf file
  /mode full|smart include whole files, or only the most relevant chunks
  /reset           clear history and uploaded files
  /help            show this help
  /quit            exit";

#[derive(Debug, PartialEq)]
pub enum Command {
    Models,
    Model(String),
    Upload(PathBuf),
    Mode(ContextMode),
    Reset,
    Help,
    Quit,
    Chat(String),
}

/// Parse one input line. `Ok(None)` for blank input.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(Command::Chat(line.to_string())));
    }

    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };
    let command = match cmd {
        "/models" => Command::Models,
        "/model" if arg.is_empty() => return Err("usage: /model <name>".to_string()),
        "/model" => Command::Model(arg.to_string()),
        "/upload" if arg.is_empty() => return Err("usage: /upload <path>".to_string()),
        "/upload" => Command::Upload(PathBuf::from(arg)),
        "/mode" => Command::Mode(arg.parse()?),
        "/reset" => Command::Reset,
        "/help" | "/?" => Command::Help,
        "/quit" | "/exit" | "/q" => Command::Quit,
        other => return Err(format!("unknown command {}: try /help", other)),
    };
    Ok(Some(command))
}

pub async fn run_interactive(services: Arc<Services>) -> anyhow::Result<()> {
    let mut session = Session::new(services.clone());
    println!(
        "Model: {} | Mode: {:?} | Runtime: {}",
        session.model(),
        session.mode(),
        services.config.model_runtime.url
    );
    println!("Type /help for commands, /quit to exit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\x1b[1;34m> \x1b[0m");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::Models => {
                for entry in services.catalog.entries() {
                    let marker = if entry.name == session.model() { "*" } else { " " };
                    println!(" {} {} ({})", marker, entry.name, entry.tag);
                }
            }
            Command::Model(name) => match session.set_model(&name) {
                Ok(()) => println!("Switched to {}", name),
                Err(e) => println!("{}", e),
            },
            Command::Mode(mode) => {
                session.set_mode(mode);
                println!("Context mode: {:?}", mode);
            }
            Command::Reset => {
                session.reset().await;
                println!("History and uploaded files cleared.");
            }
            Command::Upload(path) => match session.upload_path(&path).await {
                Ok(report) => {
                    println!("Uploaded {} ({} chunks)", report.source_id, report.chunks);
                    if let Some(warning) = report.warning {
                        println!(
                            "\x1b[33mNot indexed for retrieval ({}); use /mode full to include it.\x1b[0m",
                            warning
                        );
                    }
                }
                Err(e) => println!("\x1b[31m{}\x1b[0m", e),
            },
            Command::Chat(text) => {
                let turn = session.submit(&text, print_segment).await;
                println!("\x1b[0m");
                if let Some(error) = turn.error {
                    println!("\x1b[31m{}\x1b[0m", error);
                }
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn print_segment(segment: &Segment) {
    match segment {
        Segment::Answer(text) => print!("{}", text),
        Segment::Reasoning(text) => print!("\x1b[2m{}\x1b[0m", text),
    }
    let _ = std::io::stdout().flush();
}
