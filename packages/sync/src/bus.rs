//! Typed command channel between the UI surfaces and the map controller.
//!
//! Producers (the filter picker, the report form, the thread view) hold a
//! [`CommandSender`]; the [`crate::MapController`] owns the receiving end
//! and drains it with [`crate::MapController::pump_commands`].

use tokio::sync::mpsc;

use crate::filter::CategoryFilter;

/// A request addressed to the map controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Change the category filter and re-render.
    ApplyFilter(CategoryFilter),
    /// Use the resolved user location as the pending report location.
    ReportAtUserLocation,
    /// Drop the cached incident set so the next fetch hits the store.
    InvalidateIncidents,
}

/// Cloneable producer handle.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Queues a command. Returns `false` if the controller is gone.
    pub fn send(&self, command: Command) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Dropping command {:?}: controller closed", e.0);
                false
            }
        }
    }
}

/// Receiving end of the command channel.
#[derive(Debug)]
pub struct CommandBus {
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A new producer handle.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Takes every queued command without waiting.
    pub fn drain(&mut self) -> Vec<Command> {
        let mut commands = vec![];
        while let Ok(command) = self.rx.try_recv() {
            commands.push(command);
        }
        commands
    }
}
