//! Channel membership, topics, modes and presence.

use chrono::{DateTime, Utc};

use crate::error::SessionError;
use crate::event::Event;
use crate::irc::{Message, Prefix};
use crate::mode::{add_symbol, parse_channel_mode, parse_name_reply, remove_symbol};
use crate::roster::User;

use super::{JOIN_GRACE, Session};

impl Session {
    pub(super) fn handle_join(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;
        let params = msg.require(1)?;
        let channel = &params[0];

        if playback {
            return Ok(Some(Event::UserJoin {
                user: prefix.name.clone(),
                channel: channel.clone(),
                time: msg.time_or_now(),
            }));
        }

        let nick_cf = self.casemap(&prefix.name);
        let channel_cf = self.casemap(channel);

        if nick_cf == self.nick_cf {
            tracing::debug!(channel = %channel, "joined");
            // Drop whatever a previous, unparted membership left behind.
            self.roster.remove_channel(&channel_cf);
            self.roster.insert_channel(&channel_cf, channel);
            // Away flags only stay accurate if the server keeps them updated.
            if self.has_capability("away-notify") {
                self.send(Message::new("WHO", [channel.as_str()]));
            }
            return Ok(None);
        }

        if self.roster.channel(&channel_cf).is_none() {
            return Ok(None);
        }
        self.roster.ensure_user(&nick_cf, prefix);
        let Some(c) = self.roster.channel_mut(&channel_cf) else {
            return Ok(None);
        };
        c.members.insert(nick_cf, String::new());
        Ok(Some(Event::UserJoin {
            user: prefix.name.clone(),
            channel: c.name.clone(),
            time: msg.time_or_now(),
        }))
    }

    pub(super) fn handle_part(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;
        let params = msg.require(1)?;
        self.handle_leave(&params[0], &prefix.name, msg, playback)
    }

    pub(super) fn handle_kick(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(2)?;
        self.handle_leave(&params[0], &params[1], msg, playback)
    }

    /// Someone, maybe us, left `channel` by PART or KICK.
    fn handle_leave(
        &mut self,
        channel: &str,
        nick: &str,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        if playback {
            return Ok(Some(Event::UserPart {
                user: nick.to_string(),
                channel: channel.to_string(),
                time: msg.time_or_now(),
            }));
        }

        let nick_cf = self.casemap(nick);
        let channel_cf = self.casemap(channel);

        if nick_cf == self.nick_cf {
            let Some(c) = self.roster.remove_channel(&channel_cf) else {
                return Ok(None);
            };
            tracing::debug!(channel = %c.name, "left");
            self.pending_joins.remove(&channel_cf);
            return Ok(Some(Event::SelfPart { channel: c.name }));
        }

        let Some(user) = self.roster.user(&nick_cf).map(|u| u.name.name.clone()) else {
            return Ok(None);
        };
        let Some(channel) = self.roster.channel(&channel_cf).map(|c| c.name.clone()) else {
            return Ok(None);
        };
        if !self.roster.remove_member(&channel_cf, &nick_cf) {
            return Ok(None);
        }
        self.typings.done(&channel_cf, &nick_cf);
        Ok(Some(Event::UserPart {
            user,
            channel,
            time: msg.time_or_now(),
        }))
    }

    pub(super) fn handle_quit(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;

        if playback {
            return Ok(Some(Event::UserQuit {
                user: prefix.name.clone(),
                channels: Vec::new(),
                time: msg.time_or_now(),
            }));
        }

        let nick_cf = self.casemap(&prefix.name);
        let Some(user) = self.roster.user_mut(&nick_cf) else {
            return Ok(None);
        };
        user.disconnected = true;
        let name = user.name.name.clone();

        let left = self.roster.remove_member_everywhere(&nick_cf);
        for (channel_cf, _) in &left {
            self.typings.done(channel_cf, &nick_cf);
        }
        let mut channels: Vec<String> = left.into_iter().map(|(_, name)| name).collect();
        channels.sort();

        Ok(Some(Event::UserQuit {
            user: name,
            channels,
            time: msg.time_or_now(),
        }))
    }

    pub(super) fn handle_nick(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;
        let params = msg.require(1)?;
        let nick = &params[0];

        if playback {
            return Ok(Some(Event::UserNick {
                user: nick.clone(),
                former_nick: prefix.name.clone(),
                time: msg.time_or_now(),
            }));
        }

        let former_cf = self.casemap(&prefix.name);
        let nick_cf = self.casemap(nick);

        if former_cf == self.nick_cf {
            tracing::info!(former = %prefix.name, nick = %nick, "nick changed");
            if !self.roster.rename_user(&former_cf, &nick_cf, nick) {
                let mut me = prefix.clone();
                me.name = nick.clone();
                self.roster.insert_user(&nick_cf, User::new(me));
            }
            self.roster.set_me(&nick_cf);
            self.nick = nick.clone();
            self.nick_cf = nick_cf;
            return Ok(Some(Event::SelfNick {
                former_nick: prefix.name.clone(),
            }));
        }

        if !self.roster.rename_user(&former_cf, &nick_cf, nick) {
            return Ok(None);
        }
        Ok(Some(Event::UserNick {
            user: nick.clone(),
            former_nick: prefix.name.clone(),
            time: msg.time_or_now(),
        }))
    }

    /// `353`: merge a page of NAMES into a joined channel.
    pub(super) fn handle_names(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let params = msg.require(4)?;
        let channel_cf = self.casemap(&params[2]);
        if self.roster.channel(&channel_cf).is_none() {
            return Ok(None);
        }

        for entry in parse_name_reply(&params[3], &self.features.prefix_symbols) {
            let nick_cf = self.features.casemap(&entry.name.name);
            self.roster.ensure_user(&nick_cf, &entry.name);
            if let Some(c) = self.roster.channel_mut(&channel_cf) {
                c.members.insert(nick_cf, entry.power_level);
            }
        }
        Ok(None)
    }

    /// `366`: the first one for a channel completes our join.
    pub(super) fn handle_end_of_names(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(2)?;
        let channel_cf = self.casemap(&params[1]);
        let now = self.now();

        let Some(c) = self.roster.channel_mut(&channel_cf) else {
            return Ok(None);
        };
        if c.complete {
            return Ok(None);
        }
        c.complete = true;
        let (channel, topic) = (c.name.clone(), c.topic.clone());

        let requested = self
            .pending_joins
            .remove(&channel_cf)
            .is_some_and(|(_, at)| now.saturating_duration_since(at) < JOIN_GRACE);
        Ok(Some(Event::SelfJoin {
            channel,
            requested,
            topic,
        }))
    }

    /// `332`
    pub(super) fn handle_topic_reply(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(3)?;
        let channel_cf = self.casemap(&params[1]);
        if let Some(c) = self.roster.channel_mut(&channel_cf) {
            c.topic = params[2].clone();
        }
        Ok(None)
    }

    /// `333`
    pub(super) fn handle_topic_who_time(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(4)?;
        let channel_cf = self.casemap(&params[1]);
        // A bad timestamp still leaves the setter worth keeping.
        let time = params[3]
            .parse()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if let Some(c) = self.roster.channel_mut(&channel_cf) {
            c.topic_who = Prefix::parse(&params[2]);
            c.topic_time = Some(time);
        }
        Ok(None)
    }

    /// `331`
    pub(super) fn handle_no_topic(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let params = msg.require(2)?;
        let channel_cf = self.casemap(&params[1]);
        if let Some(c) = self.roster.channel_mut(&channel_cf) {
            c.topic.clear();
        }
        Ok(None)
    }

    pub(super) fn handle_topic(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;
        let params = msg.require(2)?;
        let (channel, topic) = (&params[0], &params[1]);
        let time = msg.time_or_now();

        if playback {
            return Ok(Some(Event::TopicChange {
                channel: channel.clone(),
                topic: topic.clone(),
                time,
            }));
        }

        let channel_cf = self.casemap(channel);
        let Some(c) = self.roster.channel_mut(&channel_cf) else {
            return Ok(None);
        };
        c.topic = topic.clone();
        c.topic_who = Some(prefix.clone());
        c.topic_time = Some(time);
        Ok(Some(Event::TopicChange {
            channel: c.name.clone(),
            topic: c.topic.clone(),
            time,
        }))
    }

    pub(super) fn handle_mode(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(2)?;
        let channel = &params[0];
        let mode = params[1..].join(" ");

        if playback {
            return Ok(Some(Event::ModeChange {
                channel: channel.clone(),
                mode,
                time: msg.time_or_now(),
            }));
        }

        let channel_cf = self.casemap(channel);
        if self.roster.channel(&channel_cf).is_none() {
            return Ok(None);
        }

        let features = &self.features;
        let changes = parse_channel_mode(
            channel,
            &params[1],
            &params[2..],
            &features.chanmodes,
            &features.prefix_modes,
        )?;
        let memberships: Vec<(String, bool, char)> = changes
            .into_iter()
            .filter_map(|change| {
                let rank = features.prefix_modes.chars().position(|m| m == change.mode)?;
                let symbol = features.prefix_symbols.chars().nth(rank)?;
                let nick_cf = features.casemap(change.param.as_deref()?);
                Some((nick_cf, change.enable, symbol))
            })
            .collect();

        let Some(c) = self.roster.channel_mut(&channel_cf) else {
            return Ok(None);
        };
        for (nick_cf, enable, symbol) in memberships {
            if let Some(level) = c.members.get_mut(&nick_cf) {
                *level = if enable {
                    add_symbol(level, symbol, &self.features.prefix_symbols)
                } else {
                    remove_symbol(level, symbol)
                };
            }
        }
        Ok(Some(Event::ModeChange {
            channel: c.name.clone(),
            mode,
            time: msg.time_or_now(),
        }))
    }

    pub(super) fn handle_away(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;
        let nick_cf = self.casemap(&prefix.name);
        if let Some(user) = self.roster.user_mut(&nick_cf) {
            user.away = !msg.params.is_empty();
        }
        Ok(None)
    }

    pub(super) fn handle_invite(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;
        let params = msg.require(2)?;
        Ok(Some(Event::Invite {
            inviter: prefix.name.clone(),
            invitee: params[0].clone(),
            channel: params[1].clone(),
        }))
    }

    /// `341`: our own INVITE went through.
    pub(super) fn handle_inviting(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let params = msg.require(3)?;
        Ok(Some(Event::Invite {
            inviter: self.nick.clone(),
            invitee: params[1].clone(),
            channel: params[2].clone(),
        }))
    }

    /// `730`/`731`: monitored users going online or offline.
    pub(super) fn handle_monitor_status(
        &mut self,
        msg: &Message,
        online: bool,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(2)?;
        // Every target is updated; only the first transition gets an event.
        let mut first = None;
        for target in params[1].split(',') {
            let Some(prefix) = Prefix::parse(target) else {
                continue;
            };
            let nick_cf = self.casemap(&prefix.name);
            if !self.roster.is_monitored(&nick_cf) {
                continue;
            }
            let user = self.roster.ensure_user(&nick_cf, &prefix);
            if user.disconnected != online {
                continue;
            }
            user.disconnected = !online;
            if first.is_none() {
                first = Some(user.name.name.clone());
            }
        }
        Ok(first.map(|user| {
            if online {
                Event::UserOnline { user }
            } else {
                Event::UserOffline { user }
            }
        }))
    }
}
