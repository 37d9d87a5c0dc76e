use std::{
    fmt::{Debug, Display},
    hash::Hash,
    ops::ControlFlow,
    time::Duration,
};

use log::{debug, warn};
use uart_accessory_core::{
    connection::{AccessoryConnection, ConnectionState},
    events::{AccessoryEvent, ConnectionEvent},
    host::{AccessoryEnumerator, ChannelFactory},
};

use crate::{
    command::{Command, HELP},
    prompt::PromptPermissions,
};

pub type ConsoleConnection<E, F> =
    AccessoryConnection<E, PromptPermissions<<E as AccessoryEnumerator>::Accessory>, F>;

/// Turns commands and connection events into lines for the user.
pub struct Console<E, F>
where
    E: AccessoryEnumerator,
    E::Accessory: Eq + Hash + Display,
    F: ChannelFactory<E::Accessory>,
{
    connection: ConsoleConnection<E, F>,
    permissions: PromptPermissions<E::Accessory>,
}

impl<E, F> Console<E, F>
where
    E: AccessoryEnumerator,
    E::Accessory: Eq + Hash + Display,
    F: ChannelFactory<E::Accessory>,
{
    /// `permissions` must share state with the authority inside `connection`.
    pub fn new(
        connection: ConsoleConnection<E, F>,
        permissions: PromptPermissions<E::Accessory>,
    ) -> Self {
        Self {
            connection,
            permissions,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Runs one command. `Break` asks the caller to exit.
    pub fn execute(&mut self, command: Command) -> ControlFlow<(), Option<String>> {
        let reply = match command {
            Command::Status => Some(self.status()),
            Command::Open => Some(match self.connection.open() {
                Ok(ConnectionState::Open) => "Accessory opened".to_string(),
                Ok(ConnectionState::WaitingPermission) => {
                    "Waiting for permission".to_string()
                }
                Ok(ConnectionState::Closed) => "Accessory closed".to_string(),
                Err(e) => format!("Open failed: {e}"),
            }),
            Command::Close => Some(match self.connection.close() {
                Ok(()) => "Accessory closed".to_string(),
                Err(e) => format!("{e}"),
            }),
            Command::Send(text) => self.send(&text),
            Command::Allow => self.answer(true),
            Command::Deny => self.answer(false),
            Command::Help => Some(HELP.to_string()),
            Command::Quit => return ControlFlow::Break(()),
        };
        ControlFlow::Continue(reply)
    }

    /// Feeds one queued event to the connection.
    pub fn on_event(&mut self, event: ConnectionEvent<E::Accessory>) -> Option<String> {
        match self.connection.handle_event(event) {
            Ok(Some(AccessoryEvent::Opened)) => Some("Accessory opened".to_string()),
            Ok(Some(AccessoryEvent::Received { bytes, round_trip })) => {
                Some(format_received(&bytes, round_trip))
            }
            Ok(Some(AccessoryEvent::Detached)) => Some("Accessory detached".to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("{e}. Connection is {}", self.connection.state())),
        }
    }

    pub fn shutdown(&mut self) {
        if let Err(e) = self.connection.close() {
            warn!("Closing accessory on exit: {}", e);
        }
    }

    fn status(&self) -> String {
        let attached = self.connection.enumerator().attached_accessories();
        let accessory = match attached.first() {
            Some(accessory) => format!("attached ({accessory})"),
            None => "not attached".to_string(),
        };
        format!(
            "Accessory: {accessory}\nConnection: {}",
            self.connection.state()
        )
    }

    fn send(&mut self, text: &str) -> Option<String> {
        if text.is_empty() {
            debug!("Nothing to send");
            return None;
        }
        match self.connection.send(text.as_bytes()) {
            Ok(true) => None,
            Ok(false) => Some(format!(
                "Not sent, connection is {}",
                self.connection.state()
            )),
            Err(e) => Some(format!("{e}")),
        }
    }

    fn answer(&self, granted: bool) -> Option<String> {
        if self.permissions.answer(granted) {
            None
        } else {
            Some("No permission request pending".to_string())
        }
    }
}

pub fn format_received(bytes: &[u8], round_trip: Option<Duration>) -> String {
    let text = String::from_utf8_lossy(bytes);
    match round_trip {
        Some(elapsed) => format!(
            "Received: {} ({:.3} ms)",
            text,
            elapsed.as_secs_f64() * 1000.0
        ),
        None => format!("Received: {text}"),
    }
}

impl<E, F> Debug for Console<E, F>
where
    E: AccessoryEnumerator,
    E::Accessory: Eq + Hash + Display,
    F: ChannelFactory<E::Accessory>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("state", &self.connection.state())
            .finish()
    }
}
