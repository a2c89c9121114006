//! Known users and joined channels.
//!
//! Users live in one table keyed by casemapped nickname. Channels refer to
//! their members by that same key, so a user seen in several channels has a
//! single record. Callers pass keys already casemapped with the session's
//! current rule.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::casemap::Casemapping;
use crate::irc::Prefix;

/// A known IRC user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Nick, and user/host when known.
    pub name: Prefix,
    pub away: bool,
    /// Only ever true for monitored users that went offline.
    pub disconnected: bool,
}

impl User {
    pub fn new(name: Prefix) -> Self {
        Self {
            name,
            away: false,
            disconnected: false,
        }
    }
}

/// A joined channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    /// Casemapped nick → power level (membership symbols in rank order).
    pub members: HashMap<String, String>,
    pub topic: String,
    pub topic_who: Option<Prefix>,
    pub topic_time: Option<DateTime<Utc>>,
    /// Set once the end of the initial NAMES list has been seen.
    pub complete: bool,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: HashMap::new(),
            topic: String::new(),
            topic_who: None,
            topic_time: None,
            complete: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
    /// Casemapped nick → nick as given, for users we want to keep tracking
    /// even when they share no channel with us.
    monitors: HashMap<String, String>,
    /// Our own casemapped nick. Never cleaned up.
    me: Option<String>,
}

impl Roster {
    /// Pin our own record under `nick_cf`, releasing the previous key.
    pub fn set_me(&mut self, nick_cf: &str) {
        let previous = self.me.replace(nick_cf.to_string());
        if let Some(previous) = previous.filter(|p| p != nick_cf) {
            self.clean_user(&previous);
        }
    }

    pub fn user(&self, nick_cf: &str) -> Option<&User> {
        self.users.get(nick_cf)
    }

    pub fn user_mut(&mut self, nick_cf: &str) -> Option<&mut User> {
        self.users.get_mut(nick_cf)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// The user under `nick_cf`, created from `name` if unknown.
    pub fn ensure_user(&mut self, nick_cf: &str, name: &Prefix) -> &mut User {
        self.users
            .entry(nick_cf.to_string())
            .or_insert_with(|| User::new(name.clone()))
    }

    pub fn insert_user(&mut self, nick_cf: &str, user: User) {
        self.users.insert(nick_cf.to_string(), user);
    }

    pub fn channel(&self, channel_cf: &str) -> Option<&Channel> {
        self.channels.get(channel_cf)
    }

    pub fn channel_mut(&mut self, channel_cf: &str) -> Option<&mut Channel> {
        self.channels.get_mut(channel_cf)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn has_channels(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Start tracking a channel from scratch, replacing any stale record.
    pub fn insert_channel(&mut self, channel_cf: &str, name: &str) {
        self.channels
            .insert(channel_cf.to_string(), Channel::new(name));
    }

    /// Stop tracking a channel, forgetting members that are now unreferenced.
    pub fn remove_channel(&mut self, channel_cf: &str) -> Option<Channel> {
        let channel = self.channels.remove(channel_cf)?;
        for nick_cf in channel.members.keys() {
            self.clean_user(nick_cf);
        }
        Some(channel)
    }

    /// Remove one member from a channel. Returns false if either is unknown.
    pub fn remove_member(&mut self, channel_cf: &str, nick_cf: &str) -> bool {
        let removed = self
            .channels
            .get_mut(channel_cf)
            .is_some_and(|c| c.members.remove(nick_cf).is_some());
        if removed {
            self.clean_user(nick_cf);
        }
        removed
    }

    /// Remove a user from every channel; returns `(channel_cf, name)` of each.
    pub fn remove_member_everywhere(&mut self, nick_cf: &str) -> Vec<(String, String)> {
        let left: Vec<(String, String)> = self
            .channels
            .iter_mut()
            .filter_map(|(cf, c)| c.members.remove(nick_cf).map(|_| (cf.clone(), c.name.clone())))
            .collect();
        self.clean_user(nick_cf);
        left
    }

    /// Forget a user unless it is monitored or still in some channel.
    pub fn clean_user(&mut self, nick_cf: &str) {
        if self.me.as_deref() == Some(nick_cf) || self.monitors.contains_key(nick_cf) {
            return;
        }
        if self.channels.values().any(|c| c.members.contains_key(nick_cf)) {
            return;
        }
        self.users.remove(nick_cf);
    }

    /// Move a user to a new nick. Returns false if the old nick is unknown.
    pub fn rename_user(&mut self, old_cf: &str, new_cf: &str, new_nick: &str) -> bool {
        let Some(mut user) = self.users.remove(old_cf) else {
            return false;
        };
        user.name.name = new_nick.to_string();
        self.users.insert(new_cf.to_string(), user);
        for channel in self.channels.values_mut() {
            if let Some(level) = channel.members.remove(old_cf) {
                channel.members.insert(new_cf.to_string(), level);
            }
        }
        true
    }

    pub fn is_monitored(&self, nick_cf: &str) -> bool {
        self.monitors.contains_key(nick_cf)
    }

    /// Returns false if the nick was already monitored.
    pub fn add_monitor(&mut self, nick_cf: &str, nick: &str) -> bool {
        if self.monitors.contains_key(nick_cf) {
            return false;
        }
        self.monitors.insert(nick_cf.to_string(), nick.to_string());
        true
    }

    /// Returns false if the nick was not monitored.
    pub fn remove_monitor(&mut self, nick_cf: &str) -> bool {
        if self.monitors.remove(nick_cf).is_none() {
            return false;
        }
        self.clean_user(nick_cf);
        true
    }

    /// Monitored nicks, as originally given.
    pub fn monitored(&self) -> impl Iterator<Item = &str> {
        self.monitors.values().map(String::as_str)
    }

    /// Recompute every key after the server changed its casemapping.
    pub fn rekey(&mut self, casemapping: Casemapping) {
        let users = std::mem::take(&mut self.users);
        let renamed: HashMap<String, String> = users
            .iter()
            .map(|(old, u)| (old.clone(), casemapping.apply(&u.name.name)))
            .collect();
        self.me = self.me.take().map(|old| {
            renamed
                .get(&old)
                .cloned()
                .unwrap_or_else(|| casemapping.apply(&old))
        });
        self.users = users
            .into_iter()
            .map(|(old, u)| (renamed[&old].clone(), u))
            .collect();

        let channels = std::mem::take(&mut self.channels);
        self.channels = channels
            .into_values()
            .map(|mut c| {
                c.members = c
                    .members
                    .into_iter()
                    .map(|(old, level)| {
                        let key = renamed
                            .get(&old)
                            .cloned()
                            .unwrap_or_else(|| casemapping.apply(&old));
                        (key, level)
                    })
                    .collect();
                (casemapping.apply(&c.name), c)
            })
            .collect();

        let monitors = std::mem::take(&mut self.monitors);
        self.monitors = monitors
            .into_values()
            .map(|nick| (casemapping.apply(&nick), nick))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_with_alice_in(channels: &[&str]) -> Roster {
        let mut roster = Roster::default();
        for name in channels {
            roster.insert_channel(name, name);
            roster.ensure_user("alice", &Prefix::new("Alice"));
            roster
                .channel_mut(name)
                .unwrap()
                .members
                .insert("alice".into(), String::new());
        }
        roster
    }

    #[test]
    fn user_removed_after_last_channel() {
        let mut roster = roster_with_alice_in(&["#a", "#b"]);
        assert!(roster.remove_member("#a", "alice"));
        assert!(roster.user("alice").is_some());
        assert!(roster.remove_member("#b", "alice"));
        assert!(roster.user("alice").is_none());
    }

    #[test]
    fn monitored_user_survives() {
        let mut roster = roster_with_alice_in(&["#a"]);
        roster.add_monitor("alice", "Alice");
        roster.remove_channel("#a");
        assert!(roster.user("alice").is_some());
        assert!(roster.remove_monitor("alice"));
        assert!(roster.user("alice").is_none());
    }

    #[test]
    fn self_is_never_cleaned() {
        let mut roster = roster_with_alice_in(&["#a"]);
        roster.set_me("alice");
        roster.remove_channel("#a");
        assert!(roster.user("alice").is_some());

        roster.set_me("alicia");
        assert!(roster.user("alice").is_none());
    }

    #[test]
    fn remove_everywhere_reports_channels() {
        let mut roster = roster_with_alice_in(&["#a", "#b"]);
        let mut left = roster.remove_member_everywhere("alice");
        left.sort();
        let expected: Vec<(String, String)> = vec![
            ("#a".to_string(), "#a".to_string()),
            ("#b".to_string(), "#b".to_string()),
        ];
        assert_eq!(left, expected);
        assert!(roster.user("alice").is_none());
    }

    #[test]
    fn rename_moves_memberships() {
        let mut roster = roster_with_alice_in(&["#a"]);
        roster.channel_mut("#a").unwrap().members.insert("alice".into(), "@".into());
        assert!(roster.rename_user("alice", "alicia", "Alicia"));
        assert!(roster.user("alice").is_none());
        assert_eq!(roster.user("alicia").unwrap().name.name, "Alicia");
        assert_eq!(roster.channel("#a").unwrap().members["alicia"], "@");
        assert!(!roster.rename_user("nobody", "x", "X"));
    }

    #[test]
    fn rekey_follows_new_casemapping() {
        let mut roster = Roster::default();
        roster.insert_channel("#chan[1]", "#Chan[1]");
        roster.ensure_user("w[x]", &Prefix::new("W[X]"));
        roster
            .channel_mut("#chan[1]")
            .unwrap()
            .members
            .insert("w[x]".into(), String::new());
        roster.add_monitor("m~", "M~");

        roster.rekey(Casemapping::Rfc1459);
        assert!(roster.channel("#chan{1}").is_some());
        assert!(roster.user("w{x}").is_some());
        assert!(roster.channel("#chan{1}").unwrap().members.contains_key("w{x}"));
        assert!(roster.is_monitored("m^"));
        assert!(!roster.is_monitored("m~"));
    }
}
