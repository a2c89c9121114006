//! Registration: CAP negotiation, SASL, welcome and ISUPPORT.

use crate::auth::Authenticator;
use crate::error::SessionError;
use crate::event::{Event, Severity};
use crate::irc::{Command, Message, Prefix, numeric, parse_caps};
use crate::roster::User;

use super::{SUPPORTED_CAPABILITIES, Session};

impl Session {
    /// Queue the registration burst.
    pub(super) fn register(&mut self) {
        self.send(Message::new("CAP", ["LS", "302"]));
        for capability in SUPPORTED_CAPABILITIES {
            self.send(Message::new("CAP", ["REQ", capability]));
        }
        self.send(Message::new("NICK", [self.nick.as_str()]));
        self.send(Message::new(
            "USER",
            [self.user.as_str(), "0", "*", self.realname.as_str()],
        ));

        if let Some(mut auth) = self.auth.take_if(|auth| auth.eager()) {
            self.send(Message::new("AUTHENTICATE", [auth.mechanism()]));
            match auth.respond("+") {
                Ok(response) => self.send(Message::new("AUTHENTICATE", [response])),
                Err(e) => {
                    tracing::warn!(error = %e, "SASL authenticator failed");
                    self.send(Message::new("AUTHENTICATE", ["*"]));
                }
            }
        }

        if self.auth.is_none() {
            self.end_registration();
        }
    }

    /// Finish capability negotiation. Runs at most once, and never after
    /// the server welcomed us.
    pub(super) fn end_registration(&mut self) {
        if self.registered || self.negotiation_ended {
            return;
        }
        self.negotiation_ended = true;
        match self.features.net_id.clone() {
            Some(net_id) => {
                self.send(Message::new("BOUNCER", ["BIND", net_id.as_str()]));
                self.send(Message::new("CAP", ["END"]));
            }
            None => {
                self.send(Message::new("CAP", ["END"]));
                self.send(Message::new("BOUNCER", ["LISTNETWORKS"]));
            }
        }
    }

    pub(super) fn handle_unregistered(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        match msg.command() {
            Command::Numeric(numeric::ERR_NICKNAMEINUSE) => {
                let params = msg.require(2)?;
                let nick = format!("{}_", params[1]);
                tracing::debug!(nick = %nick, "nickname in use, retrying");
                self.send(Message::new("NICK", [nick]));
                Ok(None)
            }
            Command::Numeric(numeric::RPL_SASLSUCCESS) => {
                if self.auth.take().is_some() {
                    self.end_registration();
                }
                Ok(None)
            }
            _ => self.handle_registered(msg, false),
        }
    }

    pub(super) fn handle_authenticate(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        if self.auth.is_none() {
            return Ok(None);
        }
        let params = msg.require(1)?;
        let Some(auth) = self.auth.as_mut() else {
            return Ok(None);
        };
        let response = match auth.respond(&params[0]) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "SASL authenticator failed");
                "*".to_string()
            }
        };
        self.send(Message::new("AUTHENTICATE", [response]));
        Ok(None)
    }

    pub(super) fn handle_cap(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let params = msg.require(3)?;
        let subcommand = params[1].to_ascii_uppercase();
        // Multi-line LS/LIST replies carry a `*` before the list.
        let caps = match params.get(3) {
            Some(caps) if params[2] == "*" => caps,
            _ => &params[2],
        };

        match subcommand.as_str() {
            "LS" => {
                for cap in parse_caps(caps) {
                    self.available_caps.insert(cap.name, cap.value);
                }
            }
            "ACK" => {
                for cap in parse_caps(caps) {
                    if cap.enable {
                        tracing::debug!(cap = %cap.name, "capability enabled");
                        self.enabled_caps.insert(cap.name.clone());
                    } else {
                        self.enabled_caps.remove(&cap.name);
                    }

                    if cap.name == "sasl" {
                        if let Some(auth) = &self.auth {
                            let mechanism = auth.mechanism().to_string();
                            self.send(Message::new("AUTHENTICATE", [mechanism]));
                        }
                    } else if cap.name == "multi-prefix" && self.roster.has_channels() {
                        // Refresh power levels now that all of them are listed.
                        for channel in self.channels() {
                            self.send(Message::new("NAMES", [channel]));
                        }
                    }
                }
            }
            "NAK" => {
                let sasl_refused = parse_caps(caps).iter().any(|cap| cap.name == "sasl");
                if sasl_refused && self.auth.take().is_some() {
                    tracing::warn!("server refused SASL, registering without it");
                    self.end_registration();
                }
            }
            "NEW" => {
                for cap in parse_caps(caps) {
                    let wanted = SUPPORTED_CAPABILITIES.contains(&cap.name.as_str())
                        && !self.enabled_caps.contains(&cap.name);
                    if wanted {
                        self.send(Message::new("CAP", ["REQ", cap.name.as_str()]));
                    }
                    self.available_caps.insert(cap.name, cap.value);
                }
            }
            "DEL" => {
                for cap in parse_caps(caps) {
                    self.available_caps.remove(&cap.name);
                    self.enabled_caps.remove(&cap.name);
                }
            }
            _ => {}
        }
        Ok(None)
    }

    pub(super) fn handle_logged_in(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(3)?;
        if let Some(prefix) = Prefix::parse(&params[1]) {
            if let Some(user) = prefix.user {
                self.user = user;
            }
            if prefix.host.is_some() {
                self.host = prefix.host;
            }
        }
        tracing::info!(account = %params[2], "logged in");
        self.acct = Some(params[2].clone());
        Ok(None)
    }

    /// 902 and 904 to 908: give up on SASL but still register.
    pub(super) fn handle_sasl_failure(&mut self, msg: &Message) -> Event {
        if self.auth.take().is_some() {
            self.end_registration();
        }
        let message = msg.params.get(1..).unwrap_or_default().join(" ");
        Event::Error {
            severity: Severity::Fail,
            code: msg.command.clone(),
            message: format!("Registration failed: {message}"),
        }
    }

    pub(super) fn handle_welcome(&mut self, msg: &Message) -> Result<Option<Event>, SessionError> {
        let params = msg.require(1)?;
        self.nick = params[0].clone();
        self.nick_cf = self.casemap(&self.nick);
        self.registered = true;
        tracing::info!(nick = %self.nick, "registered");

        let me = Prefix {
            name: self.nick.clone(),
            user: Some(self.user.clone()),
            host: self.host.clone(),
        };
        self.roster.insert_user(&self.nick_cf, User::new(me));
        self.roster.set_me(&self.nick_cf);
        if self.host.is_none() {
            self.send(Message::new("WHO", [self.nick.as_str()]));
        }
        Ok(None)
    }

    pub(super) fn handle_isupport(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(3)?;
        let applied = self.features.apply(&params[1..params.len() - 1]);

        if applied.casemapping_changed {
            self.apply_casemapping();
        }
        if applied.monitor_enabled {
            let mut monitored: Vec<&str> = self.roster.monitored().collect();
            if !monitored.is_empty() {
                monitored.sort_unstable();
                let targets = monitored.join(",");
                self.send(Message::new("MONITOR", ["+", targets.as_str()]));
            }
        }

        if self.registered && !self.announced {
            self.announced = true;
            return Ok(Some(Event::Registered));
        }
        Ok(None)
    }

    /// Re-key everything casemapped after the server changed its rule.
    fn apply_casemapping(&mut self) {
        let casemapping = self.features.casemapping;
        tracing::debug!(?casemapping, "casemapping changed, re-keying state");
        self.nick_cf = casemapping.apply(&self.nick);
        self.roster.rekey(casemapping);
        self.roster.set_me(&self.nick_cf);
        self.batches.rekey(casemapping);
        let pending = std::mem::take(&mut self.pending_joins);
        self.pending_joins = pending
            .into_values()
            .map(|(channel, at)| (casemapping.apply(&channel), (channel, at)))
            .collect();
        // Typing state is short-lived; starting over is harmless.
        self.typings.clear();
        self.typing_limiter.clear_all();
    }

    pub(super) fn handle_who_reply(
        &mut self,
        msg: &Message,
    ) -> Result<Option<Event>, SessionError> {
        let params = msg.require(8)?;
        let (username, host, nick, flags) = (&params[2], &params[3], &params[5], &params[6]);
        let nick_cf = self.casemap(nick);
        let away = flags.starts_with('G');

        if nick_cf == self.nick_cf {
            self.user = username.clone();
            self.host = Some(host.clone());
        }
        if let Some(user) = self.roster.user_mut(&nick_cf) {
            user.away = away;
            user.name.user = Some(username.clone());
            user.name.host = Some(host.clone());
        }
        Ok(None)
    }
}
