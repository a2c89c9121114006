//! lurk-sdk: IRC client session engine.
//!
//! Turns a stream of parsed IRC messages into a queryable model of the
//! server (registration, capabilities, users, channels, topics, typing) and
//! user intents into correctly sequenced outgoing messages. No I/O happens
//! here: the caller reads lines, feeds them to [`Session::handle_message`]
//! and writes out whatever arrives on the session's output channel.
//!
//! - IRCv3 capability negotiation and SASL (PLAIN)
//! - ISUPPORT-driven casemapping, mode classes and membership prefixes
//! - chathistory, history targets and search batches
//! - rate-limited typing notifications

pub mod auth;
pub mod batch;
pub mod casemap;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod features;
pub mod irc;
pub mod mode;
pub mod roster;
pub mod session;
pub mod typing;

pub use auth::{Authenticator, SaslPlain};
pub use casemap::Casemapping;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::{ConfigError, SessionError};
pub use event::{Event, MessageEvent, Severity};
pub use irc::{Message, Prefix};
pub use session::{HistoryRequest, Member, SUPPORTED_CAPABILITIES, Session, SessionParams};
