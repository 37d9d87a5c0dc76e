use std::fmt::Display;

/// One line typed at the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Open,
    Close,
    /// Text after `send `, kept as typed.
    Send(String),
    Allow,
    Deny,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl Display for UnknownCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown command '{}', try 'help'", self.0)
    }
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, UnknownCommand> {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim_start();
        let (word, rest) = match trimmed.split_once(' ') {
            Some((word, rest)) => (word, rest),
            None => (trimmed.trim_end(), ""),
        };

        let command = match word {
            "" => return Ok(None),
            "status" => Self::Status,
            "open" => Self::Open,
            "close" => Self::Close,
            "send" => Self::Send(rest.to_string()),
            "allow" => Self::Allow,
            "deny" => Self::Deny,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

pub const HELP: &str = "\
Commands:
  status       show accessory presence and connection state
  open         open the accessory (asks for permission if needed)
  close        close the accessory
  send <text>  write text to the accessory
  allow        grant the pending permission request
  deny         refuse the pending permission request
  quit         exit";
