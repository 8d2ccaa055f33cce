use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A unit of replicated work sent to remote members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Put { key: String, value: String },
    Remove { key: String },
    Invalidate { keys: Vec<String> },
    Clear,
}

/// A command on the wire, stamped with the time it was issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub timestamp: i64,
    pub command: Command,
}

/// A member's reply to a command, or the absence of one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// The command was applied, carrying the previous value if there was one.
    Success(Option<String>),
    Exception(String),
    /// The member left the cluster and was excused.
    Suspected,
    NoReply,
}

impl Response {
    pub fn is_successful(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    /// Whether the member has actually answered.
    pub fn is_received(&self) -> bool {
        matches!(self, Response::Success(_) | Response::Exception(_))
    }
}

/// Encodes commands with bincode, refusing anything over the configured size.
#[derive(Debug, Clone, Copy)]
pub struct Marshaller {
    limit: u64,
}

impl Marshaller {
    pub fn new(limit: u64) -> Self {
        Marshaller { limit }
    }

    fn options(&self) -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(self.limit)
    }

    pub fn marshall(&self, command: &Command) -> Result<Vec<u8>> {
        let envelope = Envelope {
            timestamp: chrono::Utc::now().timestamp_millis(),
            command: command.clone(),
        };
        Ok(self.options().serialize(&envelope)?)
    }

    /// Fail like [`Marshaller::marshall`] would if `command` is over the limit,
    /// without encoding it.
    pub fn check_size(&self, command: &Command) -> Result<()> {
        let envelope = Envelope {
            timestamp: 0,
            command: command.clone(),
        };
        self.options().serialized_size(&envelope)?;
        Ok(())
    }

    pub fn unmarshall(&self, bytes: &[u8]) -> Result<Envelope> {
        Ok(self.options().deserialize(bytes)?)
    }
}
