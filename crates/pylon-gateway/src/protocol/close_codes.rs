//! Gateway close codes and their classification
//!
//! What a close means for the session is data, not code: `CloseCodeTable`
//! starts from the built-in classification and applies configured
//! overrides on top.

use std::collections::HashMap;
use std::fmt;

use pylon_common::CloseBehavior;

/// Close codes sent by the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Local close that ends the session on the remote too
    pub const NORMAL: u16 = 1000;
    /// Local close that keeps the session resumable
    pub const RECONNECT: u16 = 4000;

    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Built-in classification
    #[must_use]
    pub const fn class(self) -> CloseClass {
        match self {
            Self::AuthenticationFailed => CloseClass::Fatal(FatalReason::Authentication),
            Self::InvalidShard | Self::ShardingRequired => CloseClass::Fatal(FatalReason::Sharding),
            Self::InvalidApiVersion => CloseClass::Fatal(FatalReason::ApiVersion),
            Self::InvalidIntents | Self::DisallowedIntents => CloseClass::Fatal(FatalReason::Intents),
            Self::InvalidSequence | Self::SessionTimedOut => CloseClass::NonResumable,
            _ => CloseClass::Resumable,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error",
            Self::UnknownOpcode => "Unknown opcode sent",
            Self::DecodeError => "Invalid payload sent",
            Self::NotAuthenticated => "Payload sent before identifying",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Identified more than once",
            Self::InvalidSequence => "Invalid sequence on resume",
            Self::RateLimited => "Sending payloads too quickly",
            Self::SessionTimedOut => "Session timed out",
            Self::InvalidShard => "Invalid shard",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Why a close ends the shard for good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalReason {
    Authentication,
    Intents,
    Sharding,
    ApiVersion,
    /// Marked fatal by a configured override
    Configured,
}

impl FatalReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Intents => "intents",
            Self::Sharding => "sharding",
            Self::ApiVersion => "api_version",
            Self::Configured => "configured",
        }
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a close means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseClass {
    /// Reconnect and resume
    Resumable,
    /// Reconnect with a fresh session
    NonResumable,
    /// Stop the shard
    Fatal(FatalReason),
}

/// Close code classification with configured overrides
#[derive(Debug, Clone, Default)]
pub struct CloseCodeTable {
    overrides: HashMap<u16, CloseBehavior>,
}

impl CloseCodeTable {
    pub fn new(overrides: HashMap<u16, CloseBehavior>) -> Self {
        Self { overrides }
    }

    /// Classify a close code
    ///
    /// A missing code (stream dropped without a close frame) and any code
    /// without an entry, including codes below 4000, are resumable.
    pub fn classify(&self, code: Option<u16>) -> CloseClass {
        let Some(code) = code else {
            return CloseClass::Resumable;
        };
        let builtin = CloseCode::from_u16(code).map_or(CloseClass::Resumable, CloseCode::class);

        match self.overrides.get(&code) {
            Some(CloseBehavior::Resumable) => CloseClass::Resumable,
            Some(CloseBehavior::NonResumable) => CloseClass::NonResumable,
            Some(CloseBehavior::Fatal) => match builtin {
                CloseClass::Fatal(reason) => CloseClass::Fatal(reason),
                _ => CloseClass::Fatal(FatalReason::Configured),
            },
            None => builtin,
        }
    }
}
