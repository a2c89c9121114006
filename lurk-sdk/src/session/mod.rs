//! Per-connection IRC session.
//!
//! A [`Session`] owns everything known about one server connection and is
//! driven from two sides:
//! - inbound messages go through [`Session::handle_message`], which updates
//!   state and returns at most one [`Event`]
//! - builder calls ([`Session::privmsg`], [`Session::join`], ...) push
//!   outbound messages onto the caller's channel
//!
//! The handlers are split into submodules:
//! - [`registration`]: CAP negotiation, SASL, welcome and ISUPPORT
//! - [`channel`]: JOIN, PART, KICK, QUIT, NICK, NAMES, TOPIC, MODE, MONITOR
//! - [`messaging`]: PRIVMSG, NOTICE, TAGMSG, BATCH, READ, BOUNCER, replies
//! - [`outbound`]: builders for outgoing commands
//! - [`history`]: CHATHISTORY requests

mod channel;
mod history;
mod messaging;
mod outbound;
mod registration;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::auth::Authenticator;
use crate::batch::{BatchKind, Batches};
use crate::clock::{Clock, SystemClock};
use crate::error::SessionError;
use crate::event::Event;
use crate::features::Features;
use crate::irc::{Command, Message, Prefix, numeric};
use crate::roster::Roster;
use crate::typing::{TypingLimiter, Typings};

pub use history::HistoryRequest;
pub use outbound::split_chunks;

/// Capabilities requested from every server.
pub const SUPPORTED_CAPABILITIES: [&str; 15] = [
    "away-notify",
    "batch",
    "cap-notify",
    "echo-message",
    "invite-notify",
    "message-tags",
    "multi-prefix",
    "server-time",
    "sasl",
    "setname",
    "draft/chathistory",
    "draft/event-playback",
    "soju.im/bouncer-networks",
    "soju.im/read",
    "soju.im/search",
];

/// A self-join completing within this long after [`Session::join`] is
/// reported as requested.
const JOIN_GRACE: Duration = Duration::from_secs(5);

/// What a session needs to register.
pub struct SessionParams {
    pub nickname: String,
    pub username: String,
    pub realname: String,
    /// Bouncer network to bind to, if any.
    pub net_id: Option<String>,
    pub auth: Option<Box<dyn Authenticator>>,
}

impl SessionParams {
    /// Params using `nickname` for the username and realname too.
    pub fn new(nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        Self {
            username: nickname.clone(),
            realname: nickname.clone(),
            nickname,
            net_id: None,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: impl Authenticator + 'static) -> Self {
        self.auth = Some(Box::new(auth));
        self
    }
}

/// A user listed by [`Session::names`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub power_level: String,
    pub name: Prefix,
    pub away: bool,
    pub disconnected: bool,
}

pub struct Session {
    out: Option<mpsc::UnboundedSender<Message>>,
    clock: Arc<dyn Clock>,

    closed: bool,
    registered: bool,
    negotiation_ended: bool,
    /// Whether [`Event::Registered`] went out already.
    announced: bool,

    nick: String,
    nick_cf: String,
    user: String,
    realname: String,
    acct: Option<String>,
    host: Option<String>,
    auth: Option<Box<dyn Authenticator>>,

    available_caps: HashMap<String, Option<String>>,
    enabled_caps: HashSet<String>,

    features: Features,
    roster: Roster,
    batches: Batches,
    /// Casemapped channel → the channel and when we asked to join it.
    pending_joins: HashMap<String, (String, Instant)>,

    typings: Typings,
    typing_limiter: TypingLimiter,
}

impl Session {
    /// Start a session, queueing the registration burst on `out`.
    pub fn new(out: mpsc::UnboundedSender<Message>, params: SessionParams) -> Self {
        Self::with_clock(out, params, Arc::new(SystemClock))
    }

    pub fn with_clock(
        out: mpsc::UnboundedSender<Message>,
        params: SessionParams,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let features = Features {
            net_id: params.net_id,
            ..Features::default()
        };
        let mut session = Self {
            out: Some(out),
            clock,
            closed: false,
            registered: false,
            negotiation_ended: false,
            announced: false,
            nick_cf: features.casemap(&params.nickname),
            nick: params.nickname,
            user: params.username,
            realname: params.realname,
            acct: None,
            host: None,
            auth: params.auth,
            available_caps: HashMap::new(),
            enabled_caps: HashSet::new(),
            features,
            roster: Roster::default(),
            batches: Batches::default(),
            pending_joins: HashMap::new(),
            typings: Typings::default(),
            typing_limiter: TypingLimiter::default(),
        };
        session.roster.set_me(&session.nick_cf);
        session.register();
        session
    }

    /// Stop sending. Idempotent; the output channel is dropped on the first
    /// call.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        tracing::debug!(nick = %self.nick, "closing session");
        self.closed = true;
        self.typings.clear();
        self.typing_limiter.clear_all();
        self.out = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Whether `capability` was acknowledged by the server.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.enabled_caps.contains(capability)
    }

    /// Value the server advertised for `capability`, if it was advertised.
    pub fn available_capability(&self, capability: &str) -> Option<Option<&str>> {
        self.available_caps
            .get(capability)
            .map(|value| value.as_deref())
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Our casemapped nickname.
    pub fn nick_cf(&self) -> &str {
        &self.nick_cf
    }

    /// SASL account, once logged in.
    pub fn account(&self) -> Option<&str> {
        self.acct.as_deref()
    }

    pub fn net_id(&self) -> Option<&str> {
        self.features.net_id.as_deref()
    }

    pub fn is_me(&self, nick: &str) -> bool {
        self.casemap(nick) == self.nick_cf
    }

    pub fn is_channel(&self, name: &str) -> bool {
        self.features.is_channel(name)
    }

    pub fn casemap(&self, name: &str) -> String {
        self.features.casemap(name)
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Nicknames of every known user, sorted.
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.roster.users().map(|u| u.name.name.clone()).collect();
        users.sort();
        users
    }

    /// Members of a channel, or the user and ourselves for a nickname,
    /// sorted by casemapped name. Empty for unknown targets.
    pub fn names(&self, target: &str) -> Vec<Member> {
        let target_cf = self.casemap(target);
        let mut names = Vec::new();
        if self.is_channel(target) {
            if let Some(channel) = self.roster.channel(&target_cf) {
                for (nick_cf, power_level) in &channel.members {
                    if let Some(user) = self.roster.user(nick_cf) {
                        names.push(Member {
                            power_level: power_level.clone(),
                            name: user.name.clone(),
                            away: user.away,
                            disconnected: user.disconnected,
                        });
                    }
                }
            }
        } else if let Some(user) = self.roster.user(&target_cf) {
            names.push(Member {
                power_level: String::new(),
                name: user.name.clone(),
                away: user.away,
                disconnected: user.disconnected,
            });
            names.push(Member {
                power_level: String::new(),
                name: Prefix::new(self.nick.clone()),
                away: false,
                disconnected: false,
            });
        }
        names.sort_by_cached_key(|m| self.casemap(&m.name.name));
        names
    }

    /// Nicknames currently typing in `target`, ourselves excluded.
    pub fn typings(&self, target: &str) -> Vec<String> {
        let target_cf = self.casemap(target);
        let mut typing: Vec<String> = self
            .typings
            .list(&target_cf, self.clock.now())
            .into_iter()
            .filter(|nick_cf| *nick_cf != self.nick_cf)
            .map(|nick_cf| match self.roster.user(&nick_cf) {
                Some(user) => user.name.name.clone(),
                None => nick_cf,
            })
            .collect();
        typing.sort();
        typing
    }

    /// Channels we share with `nick`. Empty for disconnected users.
    pub fn channels_shared_with(&self, nick: &str) -> Vec<String> {
        let nick_cf = self.casemap(nick);
        match self.roster.user(&nick_cf) {
            Some(user) if !user.disconnected => {}
            _ => return Vec::new(),
        }
        let mut channels: Vec<String> = self
            .roster
            .channels()
            .filter(|c| c.members.contains_key(&nick_cf))
            .map(|c| c.name.clone())
            .collect();
        channels.sort();
        channels
    }

    /// Topic text, setter and set time of a joined channel.
    pub fn topic(&self, channel: &str) -> Option<(&str, Option<&Prefix>, Option<DateTime<Utc>>)> {
        let channel = self.roster.channel(&self.casemap(channel))?;
        Some((
            channel.topic.as_str(),
            channel.topic_who.as_ref(),
            channel.topic_time,
        ))
    }

    /// Display names of the channels we are in, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.roster.channels().map(|c| c.name.clone()).collect();
        channels.sort();
        channels
    }

    /// Queue a message for the server.
    fn send(&self, msg: Message) {
        let Some(out) = &self.out else {
            tracing::trace!(command = %msg.command, "session closed, dropping message");
            return;
        };
        if out.send(msg).is_err() {
            tracing::trace!("output channel closed, dropping message");
        }
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Process one inbound message.
    ///
    /// Malformed messages yield an error and leave the session untouched.
    pub fn handle_message(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        // Nested BATCH lines open and close batches of their own.
        if let Some(id) = msg.tag("batch")
            && msg.command() != Command::Batch
        {
            match self.batches.kind(id) {
                Some(BatchKind::Targets) => {
                    self.record_history_target(msg)?;
                }
                Some(BatchKind::Search) => {
                    if let Some(Event::Message(message)) = self.handle_registered(msg, true)? {
                        self.batches.push_search(message);
                        return Ok(None);
                    }
                }
                Some(BatchKind::History) => {
                    if let Some(event) = self.handle_registered(msg, true)? {
                        self.batches.push_history(id, event);
                        return Ok(None);
                    }
                }
                None => {}
            }
        }
        if self.registered {
            self.handle_registered(msg, false)
        } else {
            self.handle_unregistered(msg)
        }
    }

    /// Dispatch of a message that is either live or played back from a
    /// batch. Played-back messages produce events without touching state.
    fn handle_registered(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        match msg.command() {
            Command::Authenticate => self.handle_authenticate(msg),
            Command::Cap => self.handle_cap(msg),
            Command::Numeric(numeric::RPL_LOGGEDIN) => self.handle_logged_in(msg),
            Command::Numeric(
                numeric::ERR_NICKLOCKED
                | numeric::ERR_SASLFAIL
                | numeric::ERR_SASLTOOLONG
                | numeric::ERR_SASLABORTED
                | numeric::ERR_SASLALREADY
                | numeric::RPL_SASLMECHS,
            ) => Ok(Some(self.handle_sasl_failure(msg))),
            Command::Numeric(numeric::RPL_WELCOME) => self.handle_welcome(msg),
            Command::Numeric(numeric::RPL_ISUPPORT) => self.handle_isupport(msg),
            Command::Numeric(numeric::RPL_WHOREPLY) => self.handle_who_reply(msg),
            Command::Numeric(numeric::RPL_ENDOFWHO) => Ok(None),

            Command::Join => self.handle_join(msg, playback),
            Command::Part => self.handle_part(msg, playback),
            Command::Kick => self.handle_kick(msg, playback),
            Command::Quit => self.handle_quit(msg, playback),
            Command::Nick => self.handle_nick(msg, playback),
            Command::Numeric(numeric::RPL_NAMREPLY) => self.handle_names(msg),
            Command::Numeric(numeric::RPL_ENDOFNAMES) => self.handle_end_of_names(msg),
            Command::Numeric(numeric::RPL_TOPIC) => self.handle_topic_reply(msg),
            Command::Numeric(numeric::RPL_TOPICWHOTIME) => self.handle_topic_who_time(msg),
            Command::Numeric(numeric::RPL_NOTOPIC) => self.handle_no_topic(msg),
            Command::Topic => self.handle_topic(msg, playback),
            Command::Mode => self.handle_mode(msg, playback),
            Command::Away => self.handle_away(msg),
            Command::Invite => self.handle_invite(msg),
            Command::Numeric(numeric::RPL_INVITING) => self.handle_inviting(msg),
            Command::Numeric(numeric::RPL_MONONLINE) => self.handle_monitor_status(msg, true),
            Command::Numeric(numeric::RPL_MONOFFLINE) => self.handle_monitor_status(msg, false),
            // Best effort: a full monitor list is not worth reporting.
            Command::Numeric(numeric::ERR_MONLISTFULL) => Ok(None),

            Command::Privmsg | Command::Notice => self.handle_privmsg(msg, playback),
            Command::Tagmsg => self.handle_tagmsg(msg, playback),
            Command::Batch => self.handle_batch(msg),
            Command::Read => self.handle_read(msg),
            Command::Bouncer => Ok(self.handle_bouncer(msg)),
            Command::Ping => self.handle_ping(msg),
            Command::Error => {
                tracing::info!(reason = ?msg.params.last(), "server closed the connection");
                self.close();
                Ok(None)
            }
            Command::Fail | Command::Warn | Command::Note => self.handle_standard_reply(msg),
            Command::Numeric(code) => self.handle_other_reply(msg, code),
            Command::Other(command) => {
                tracing::trace!(command, "ignoring unhandled command");
                Ok(None)
            }
        }
    }
}
