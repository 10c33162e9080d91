use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  /// Advance N event times.
  Step(u32),
  /// Drain every bridge port.
  Reset,
  /// Make the peer refuse its next exclusive commit.
  FailCommit,
  Continue,
  Quit,
}

/// Parses one line typed at the step prompt. An empty line steps once.
pub fn parse_command(line: &str) -> std::result::Result<Command, String> {
  let trimmed = line.trim();
  match trimmed {
    "" => return Ok(Command::Step(1)),
    "q" => return Ok(Command::Quit),
    "c" => return Ok(Command::Continue),
    "reset" => return Ok(Command::Reset),
    "fail-commit" => return Ok(Command::FailCommit),
    _ => {},
  }

  if let Some(rest) = trimmed.strip_prefix("si") {
    let num_str = rest.trim();
    if num_str.is_empty() {
      return Err("'si' requires a number, e.g. 'si 100'".to_string());
    }
    return match num_str.parse::<u32>() {
      Ok(n) if n > 0 => Ok(Command::Step(n)),
      Ok(_) => Err("step count must be greater than 0".to_string()),
      Err(e) => Err(format!("invalid number '{}': {}", num_str, e)),
    };
  }

  Err(format!(
    "unknown command '{}'. Enter steps, 'si N' steps N times, 'c' continues, 'reset' drains the bridge, 'fail-commit' fails the next exclusive commit, 'q' quits",
    trimmed
  ))
}

/// Line editor for step mode.
pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    let editor = DefaultEditor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Self { editor })
  }

  pub fn read_command(&mut self) -> Result<Command> {
    loop {
      match self.editor.readline("(busbridge) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }
          match parse_command(trimmed) {
            Ok(command) => return Ok(command),
            Err(msg) => eprintln!("Error: {}", msg),
          }
        },
        // Ctrl-C / Ctrl-D
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(Command::Quit),
        Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err)),
      }
    }
  }
}
