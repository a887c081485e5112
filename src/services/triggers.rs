//! Operator-configured commands run on bin events.
//!
//! Each trigger is a program path started with the event's bin id (and file
//! name for uploads) as arguments. Triggers are fire-and-forget: the request
//! that caused the event never waits for them and never fails because of them.

use parking_lot::Mutex;
use std::{collections::HashSet, process::Stdio, sync::Arc};
use tokio::{process::Command, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Something a trigger can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEvent<'a> {
    /// The first object of a bin was stored.
    NewBin { bin: &'a str },
    UploadedFile { bin: &'a str, filename: &'a str },
    /// A bin was found expired for the first time.
    ExpiredBin { bin: &'a str },
}

impl TriggerEvent<'_> {
    fn name(&self) -> &'static str {
        match self {
            TriggerEvent::NewBin { .. } => "new-bin",
            TriggerEvent::UploadedFile { .. } => "uploaded-file",
            TriggerEvent::ExpiredBin { .. } => "expired-bin",
        }
    }

    fn args(&self) -> Vec<&str> {
        match *self {
            TriggerEvent::NewBin { bin } | TriggerEvent::ExpiredBin { bin } => vec![bin],
            TriggerEvent::UploadedFile { bin, filename } => vec![bin, filename],
        }
    }
}

/// Commands to run per event. `None` disables that trigger.
#[derive(Clone, Debug, Default)]
pub struct TriggerCommands {
    pub new_bin: Option<String>,
    pub uploaded_file: Option<String>,
    pub expired_bin: Option<String>,
}

/// Runs trigger commands. Cheap to clone; clones share expiry bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct Triggers {
    commands: TriggerCommands,
    /// Bins whose expiry has already been reported.
    expired: Arc<Mutex<HashSet<String>>>,
}

impl Triggers {
    pub fn new(commands: TriggerCommands) -> Self {
        Self {
            commands,
            expired: Arc::default(),
        }
    }

    /// Start the command configured for `event`, if any.
    ///
    /// Returns a handle that resolves once the command has exited, or `None`
    /// when nothing was started. Dropping the handle does not stop the command.
    pub fn fire(&self, event: TriggerEvent<'_>) -> Option<JoinHandle<()>> {
        let program = match event {
            TriggerEvent::NewBin { .. } => self.commands.new_bin.as_deref(),
            TriggerEvent::UploadedFile { .. } => self.commands.uploaded_file.as_deref(),
            TriggerEvent::ExpiredBin { .. } => self.commands.expired_bin.as_deref(),
        }?;

        info!(trigger = event.name(), program, "Executing trigger");
        let child = Command::new(program)
            .args(event.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(err) => {
                error!(trigger = event.name(), program, error = %err, "Trigger command failed");
                return None;
            }
        };

        let trigger = event.name();
        let program = program.to_string();
        // reap the child so it never lingers as a zombie
        Some(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(trigger, program = %program, "Trigger finished")
                }
                Ok(status) => {
                    warn!(trigger, program = %program, %status, "Trigger exited unsuccessfully")
                }
                Err(err) => error!(trigger, program = %program, error = %err, "Trigger wait failed"),
            }
        }))
    }

    /// Fire the expired-bin trigger unless this bin's expiry was reported before.
    pub fn bin_expired(&self, bin: &str) -> Option<JoinHandle<()>> {
        if !self.expired.lock().insert(bin.to_string()) {
            return None;
        }
        self.fire(TriggerEvent::ExpiredBin { bin })
    }

    /// Forget a reported expiry, so the bin's next expiry is reported again.
    pub fn bin_revived(&self, bin: &str) {
        self.expired.lock().remove(bin);
    }
}
