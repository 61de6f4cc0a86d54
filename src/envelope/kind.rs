use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// Semantic tag describing how an envelope must be delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Broadcast, best-effort, no retry.
    Event,
    /// Point-to-point intent; retried on handler failure, then dead-lettered.
    Command,
    /// Request/response; the handler replies on `reply_to`.
    Query,
}

impl MessageKind {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Event => "event",
            MessageKind::Command => "command",
            MessageKind::Query => "query",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a message came from. Drives the default priority tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Produced by a service inside the assistant (interactive tier).
    #[default]
    Internal,
    /// Arrived from outside (web hooks, remote clients).
    External,
    /// Housekeeping produced by the runtime itself.
    System,
}

impl Origin {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Internal => "internal",
            Origin::External => "external",
            Origin::System => "system",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority in `0..=99`; **lower value = delivered first**.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Highest allowed value (lowest precedence).
    pub const MAX: u8 = 99;

    /// Validates and wraps a priority value.
    ///
    /// # Example
    /// ```
    /// use switchboard::Priority;
    ///
    /// assert_eq!(Priority::new(10).unwrap().get(), 10);
    /// assert!(Priority::new(100).is_err());
    /// ```
    pub fn new(value: u8) -> Result<Self, MessageError> {
        if value > Self::MAX {
            return Err(MessageError::InvalidPriority {
                priority: i64::from(value),
            });
        }
        Ok(Self(value))
    }

    /// Raw numeric value.
    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Default priority per [`Origin`], used when a publisher does not pick one.
///
/// `internal ≈ 10` (interactive), `system ≈ 50`, `external ≈ 80`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorityTiers {
    /// Priority for [`Origin::Internal`].
    pub internal: Priority,
    /// Priority for [`Origin::System`].
    pub system: Priority,
    /// Priority for [`Origin::External`].
    pub external: Priority,
}

impl Default for PriorityTiers {
    fn default() -> Self {
        Self {
            internal: Priority(10),
            system: Priority(50),
            external: Priority(80),
        }
    }
}

impl PriorityTiers {
    /// Returns the default priority for messages of the given origin.
    pub fn for_origin(&self, origin: Origin) -> Priority {
        match origin {
            Origin::Internal => self.internal,
            Origin::System => self.system,
            Origin::External => self.external,
        }
    }
}
