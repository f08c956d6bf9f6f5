//! Interactive kiosk loop: one line per command on stdin.

use anyhow::Result;
use rollcall_core::{ActionKind, Enrollment};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::engine::{EngineHandle, HandleError};
use crate::report;

const HELP: &str = "commands: r <name> register | i punch in | o punch out | q quit";

#[derive(Debug, PartialEq)]
enum Command {
    Register(String),
    Punch(ActionKind),
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let command = match head.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "r" | "register" if rest.is_empty() => return Err("usage: r <name>".into()),
        "r" | "register" => Command::Register(rest.to_string()),
        "q" | "quit" | "exit" => Command::Quit,
        "h" | "help" | "?" => Command::Help,
        other => match other.parse::<ActionKind>() {
            Ok(action) if rest.is_empty() => Command::Punch(action),
            _ => return Err(format!("unknown command {line:?}; {HELP}")),
        },
    };
    Ok(Some(command))
}

/// Enroll with Ctrl-C wired to the engine's abort flag.
pub async fn enroll_interruptible(handle: &EngineHandle, name: String, overwrite: bool) -> Result<Enrollment, HandleError> {
    let pending = handle.enroll(name, overwrite);
    tokio::pin!(pending);
    loop {
        tokio::select! {
            result = &mut pending => return result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("aborting enrollment...");
                handle.abort();
            }
        }
    }
}

async fn next_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

pub async fn run(handle: EngineHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    while let Some(line) = next_line(&mut lines).await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Punch(action) => match handle.verify(action).await {
                Ok(v) => println!("{}", report::verification_line(&v)),
                Err(HandleError::Engine(e)) => println!("{action}: {e}"),
                Err(e) => return Err(e.into()),
            },
            Command::Register(name) => {
                let overwrite = handle.is_enrolled(&name).await?;
                if overwrite {
                    println!("{name} is already enrolled. Overwrite? [y/N]");
                    let answer = next_line(&mut lines).await?.unwrap_or_default();
                    if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                        println!("kept existing template for {name}");
                        continue;
                    }
                }
                println!("look at the camera, Ctrl-C to cancel");
                match enroll_interruptible(&handle, name, overwrite).await {
                    Ok(e) => println!("{}", report::enrollment_line(&e)),
                    Err(HandleError::Engine(e)) => println!("enrollment failed: {e}"),
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    tracing::info!("kiosk closed");
    Ok(())
}
