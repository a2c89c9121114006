//! IRC message values.
//!
//! Wire format (IRCv3 message-tags on top of RFC 1459):
//!   [`@`tags SPACE] [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
//!
//! The session engine only works with parsed [`Message`] values. `parse` and
//! the `Display` impl exist for drivers and tests; lines are handled without
//! the `\r\n` terminator.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::SessionError;

/// Numeric replies the session reacts to.
pub mod numeric {
    pub const RPL_WELCOME: u16 = 1;
    pub const RPL_ISUPPORT: u16 = 5;
    pub const RPL_ENDOFWHO: u16 = 315;
    pub const RPL_NOTOPIC: u16 = 331;
    pub const RPL_TOPIC: u16 = 332;
    pub const RPL_TOPICWHOTIME: u16 = 333;
    pub const RPL_INVITING: u16 = 341;
    pub const RPL_WHOREPLY: u16 = 352;
    pub const RPL_NAMREPLY: u16 = 353;
    pub const RPL_ENDOFNAMES: u16 = 366;
    pub const ERR_UNKNOWNCOMMAND: u16 = 421;
    pub const ERR_NICKNAMEINUSE: u16 = 433;
    pub const RPL_MONONLINE: u16 = 730;
    pub const RPL_MONOFFLINE: u16 = 731;
    pub const ERR_MONLISTFULL: u16 = 734;
    pub const RPL_LOGGEDIN: u16 = 900;
    pub const ERR_NICKLOCKED: u16 = 902;
    pub const RPL_SASLSUCCESS: u16 = 903;
    pub const ERR_SASLFAIL: u16 = 904;
    pub const ERR_SASLTOOLONG: u16 = 905;
    pub const ERR_SASLABORTED: u16 = 906;
    pub const ERR_SASLALREADY: u16 = 907;
    pub const RPL_SASLMECHS: u16 = 908;
}

/// Command of an inbound message, as a closed set.
///
/// Anything the session does not know about lands in `Other` and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Authenticate,
    Away,
    Batch,
    Bouncer,
    Cap,
    Error,
    Fail,
    Invite,
    Join,
    Kick,
    Mode,
    Nick,
    Note,
    Notice,
    Part,
    Ping,
    Privmsg,
    Quit,
    Read,
    Tagmsg,
    Topic,
    Warn,
    Numeric(u16),
    Other(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(command: &'a str) -> Self {
        if command.len() == 3 && command.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(code) = command.parse() {
                return Command::Numeric(code);
            }
        }
        match command.to_ascii_uppercase().as_str() {
            "AUTHENTICATE" => Command::Authenticate,
            "AWAY" => Command::Away,
            "BATCH" => Command::Batch,
            "BOUNCER" => Command::Bouncer,
            "CAP" => Command::Cap,
            "ERROR" => Command::Error,
            "FAIL" => Command::Fail,
            "INVITE" => Command::Invite,
            "JOIN" => Command::Join,
            "KICK" => Command::Kick,
            "MODE" => Command::Mode,
            "NICK" => Command::Nick,
            "NOTE" => Command::Note,
            "NOTICE" => Command::Notice,
            "PART" => Command::Part,
            "PING" => Command::Ping,
            "PRIVMSG" => Command::Privmsg,
            "QUIT" => Command::Quit,
            "READ" => Command::Read,
            "TAGMSG" => Command::Tagmsg,
            "TOPIC" => Command::Topic,
            "WARN" => Command::Warn,
            _ => Command::Other(command),
        }
    }
}

/// Source of a message: `nick!user@host`, or a bare server/nick name.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct Prefix {
    pub name: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl Prefix {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user: None,
            host: None,
        }
    }

    /// Parse `nick[!user][@host]`. Returns `None` for an empty name.
    pub fn parse(raw: &str) -> Option<Self> {
        let (rest, host) = match raw.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_owned())),
            None => (raw, None),
        };
        let (name, user) = match rest.split_once('!') {
            Some((name, user)) => (name, Some(user.to_owned())),
            None => (rest, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_owned(),
            user,
            host,
        })
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(user) = &self.user {
            write!(f, "!{user}")?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

/// Errors that can occur while parsing a raw line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("tags or prefix present but missing command")]
    MissingCommand,
}

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// IRCv3 message tags, unescaped.
    pub tags: HashMap<String, String>,
    pub prefix: Option<Prefix>,
    /// The command verb or 3-digit numeric, as received.
    pub command: String,
    /// Parameters; the last one may have been a trailing parameter.
    pub params: Vec<String>,
}

impl Message {
    /// Build an outgoing message.
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Attach a tag (client tags start with `+`).
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn command(&self) -> Command<'_> {
        Command::parse(&self.command)
    }

    /// The parameters, provided there are at least `n` of them.
    ///
    /// Handlers call this once with the number of positional parameters they
    /// read; the last of those may be the trailing one.
    pub fn require(&self, n: usize) -> Result<&[String], SessionError> {
        if self.params.len() < n {
            return Err(SessionError::NotEnoughParams {
                command: self.command.clone(),
                expected: n,
                got: self.params.len(),
            });
        }
        Ok(&self.params)
    }

    pub fn require_prefix(&self) -> Result<&Prefix, SessionError> {
        self.prefix
            .as_ref()
            .ok_or_else(|| SessionError::MissingPrefix(self.command.clone()))
    }

    /// Whether this is a numeric reply.
    pub fn is_reply(&self) -> bool {
        matches!(self.command(), Command::Numeric(_))
    }

    /// Server-time of the message, if the `time` tag is present and valid.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.tag("time").and_then(parse_timestamp)
    }

    pub fn time_or_now(&self) -> DateTime<Utc> {
        self.time().unwrap_or_else(Utc::now)
    }

    /// Parse a single line (without the trailing `\r\n`).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut rest = input.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw, after) = stripped.split_once(' ').ok_or(ParseError::MissingCommand)?;
            tags = parse_tags(raw);
            rest = after.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (raw, after) = stripped.split_once(' ').ok_or(ParseError::MissingCommand)?;
            prefix = Prefix::parse(raw);
            rest = after.trim_start_matches(' ');
        }

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((command, params)) => (command, params),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_owned());
                    remaining = after;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_owned(),
            params,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut tags: Vec<_> = self.tags.iter().collect();
            tags.sort();
            write!(f, "@{} ", format_tags(tags))?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// One token of a `CAP LS/ACK/NEW/DEL` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub value: Option<String>,
    /// `false` for `-name` tokens.
    pub enable: bool,
}

pub fn parse_caps(caps: &str) -> Vec<Capability> {
    caps.split_whitespace()
        .map(|token| {
            let (enable, token) = match token.strip_prefix('-') {
                Some(token) => (false, token),
                None => (true, token),
            };
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name, Some(value.to_owned())),
                None => (token, None),
            };
            Capability {
                name: name.to_owned(),
                value,
                enable,
            }
        })
        .filter(|c| !c.name.is_empty())
        .collect()
}

/// Parse `key=value;key2` tag syntax, unescaping values.
pub fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|t| !t.is_empty())
        .map(|t| match t.split_once('=') {
            Some((k, v)) => (k.to_owned(), unescape_tag_value(v)),
            None => (t.to_owned(), String::new()),
        })
        .collect()
}

/// Format tags as `key=value;key2`, escaping values.
pub fn format_tags<I, K, V>(tags: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (k, v) in tags {
        if !out.is_empty() {
            out.push(';');
        }
        out.push_str(k.as_ref());
        if !v.as_ref().is_empty() {
            out.push('=');
            out.push_str(&escape_tag_value(v.as_ref()));
        }
    }
    out
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format a `timestamp=` criterion as used by CHATHISTORY and READ.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    format!("timestamp={}", t.format(TIMESTAMP_FORMAT))
}

/// Parse a server-time value (`2024-01-02T03:04:05.678Z`).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}
