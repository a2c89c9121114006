//! Messages, typing notifications, batches and server replies.

use crate::batch::Closed;
use crate::error::SessionError;
use crate::event::{Event, MessageEvent, Severity};
use crate::irc::{Command, Message, Prefix, numeric, parse_tags, parse_timestamp};
use crate::typing::TypingState;

use super::Session;

impl Session {
    /// Key under which typing state of a conversation is kept: the channel,
    /// or the other party of a private conversation.
    pub(super) fn conversation_cf(&self, target: &str, sender_cf: &str) -> String {
        let target_cf = self.casemap(target);
        if target_cf == self.nick_cf {
            sender_cf.to_string()
        } else {
            target_cf
        }
    }

    pub(super) fn handle_privmsg(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        let prefix = msg.require_prefix()?;
        let params = msg.require(2)?;

        if !playback {
            let nick_cf = self.casemap(&prefix.name);
            let conversation_cf = self.conversation_cf(&params[0], &nick_cf);
            self.typings.done(&conversation_cf, &nick_cf);
        }
        Ok(Some(Event::Message(self.message_event(msg, prefix, params))))
    }

    fn message_event(&self, msg: &Message, prefix: &Prefix, params: &[String]) -> MessageEvent {
        let (target, target_is_channel) = match self.roster.channel(&self.casemap(&params[0])) {
            Some(c) => (c.name.clone(), true),
            None => (params[0].clone(), false),
        };
        MessageEvent {
            user: prefix.name.clone(),
            target,
            target_is_channel,
            command: msg.command.to_ascii_uppercase(),
            content: params[1].clone(),
            time: msg.time_or_now(),
        }
    }

    pub(super) fn handle_tagmsg(
        &mut self,
        msg: &Message,
        playback: bool,
    ) -> Result<Option<Event>, SessionError> {
        if playback {
            return Ok(None);
        }
        let prefix = msg.require_prefix()?;
        let params = msg.require(1)?;

        let nick_cf = self.casemap(&prefix.name);
        if nick_cf == self.nick_cf {
            return Ok(None);
        }
        let Some(state) = msg.tag("+typing").and_then(TypingState::from_tag) else {
            return Ok(None);
        };
        let conversation_cf = self.conversation_cf(&params[0], &nick_cf);
        match state {
            TypingState::Active => {
                let now = self.now();
                self.typings.active(&conversation_cf, &nick_cf, now);
            }
            TypingState::Paused | TypingState::Done => {
                self.typings.done(&conversation_cf, &nick_cf);
            }
        }
        Ok(None)
    }

    pub(super) fn handle_batch(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let params = msg.require(1)?;
        let reference = &params[0];
        let (start, id) = match reference.strip_prefix('+') {
            Some(id) => (true, id),
            None => (false, reference.strip_prefix('-').unwrap_or(reference)),
        };
        if id.is_empty() {
            return Err(SessionError::EmptyBatchId);
        }

        if start {
            let params = msg.require(2)?;
            let opened = match params[1].as_str() {
                "chathistory" => {
                    let params = msg.require(3)?;
                    self.batches.open_history(id, &params[2])
                }
                "draft/chathistory-targets" => self.batches.open_targets(id),
                "soju.im/search" => self.batches.open_search(id),
                kind => {
                    tracing::trace!(id, kind, "ignoring batch");
                    true
                }
            };
            if !opened {
                tracing::warn!(id, "batch id already open, ignoring");
            }
            return Ok(None);
        }

        let event = match self.batches.close(id) {
            Some(Closed::History { target, events }) => {
                let target_cf = self.casemap(&target);
                self.batches.finish_request(&target_cf);
                Event::History { target, events }
            }
            Some(Closed::Targets(targets)) => {
                self.batches.finish_request("");
                Event::HistoryTargets { targets }
            }
            Some(Closed::Search(messages)) => Event::Search { messages },
            None => return Ok(None),
        };
        Ok(Some(event))
    }

    /// A `CHATHISTORY TARGETS <target> <timestamp>` line of a targets batch.
    pub(super) fn record_history_target(&mut self, msg: &Message) -> Result<(), SessionError> {
        let params = msg.require(3)?;
        let raw = params[2].strip_prefix("timestamp=").unwrap_or(&params[2]);
        match parse_timestamp(raw) {
            Some(time) => self.batches.push_target(&params[1], time),
            None => {
                tracing::debug!(history_target = %params[1], raw, "skipping target with bad timestamp");
            }
        }
        Ok(())
    }

    pub(super) fn handle_read(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        if msg.params.len() < 2 {
            return Ok(None);
        }
        let Some(timestamp) = msg.params[1]
            .strip_prefix("timestamp=")
            .and_then(parse_timestamp)
        else {
            return Ok(None);
        };
        Ok(Some(Event::Read {
            target: msg.params[0].clone(),
            timestamp,
        }))
    }

    /// Networks are only listed by a connection that is not bound to one.
    pub(super) fn handle_bouncer(&mut self, msg: &Message) -> Option<Event> {
        if msg.params.len() < 3 || msg.params[0] != "NETWORK" || self.features.net_id.is_some() {
            return None;
        }
        let mut attrs = parse_tags(&msg.params[2]);
        Some(Event::BouncerNetwork {
            id: msg.params[1].clone(),
            name: attrs.remove("name"),
        })
    }

    pub(super) fn handle_ping(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let params = msg.require(1)?;
        self.send(Message::new("PONG", [params[0].as_str()]));
        Ok(None)
    }

    /// FAIL, WARN and NOTE.
    pub(super) fn handle_standard_reply(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(2)?;
        let severity = match msg.command() {
            Command::Fail => Severity::Fail,
            Command::Warn => Severity::Warn,
            _ => Severity::Note,
        };
        Ok(Some(Event::Error {
            severity,
            code: params[1].clone(),
            message: params[2..].join(" "),
        }))
    }

    /// Any numeric reply without a dedicated handler.
    pub(super) fn handle_other_reply(
        &mut self,
        msg: &Message,
        code: u16,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(2)?;
        // BOUNCER LISTNETWORKS is sent whether or not the server knows it.
        if code == numeric::ERR_UNKNOWNCOMMAND && params[1] == "BOUNCER" {
            return Ok(None);
        }
        Ok(Some(Event::Error {
            severity: Severity::from_reply(code),
            code: msg.command.clone(),
            message: params[1..].join(" "),
        }))
    }
}
