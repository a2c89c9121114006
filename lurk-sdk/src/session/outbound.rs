//! Builders for outgoing commands.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::irc::{Message, format_tags, format_timestamp};

use super::Session;

/// Longest possible host, used to size lines before we know ours.
const MAX_HOST: &str = "255.255.255.255";

/// Split `text` into chunks of at most `chunk_len` bytes, never inside a
/// character. A zero `chunk_len` means no limit. A character wider than
/// `chunk_len` gets a chunk of its own.
pub fn split_chunks(text: &str, chunk_len: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    if chunk_len == 0 {
        return vec![text];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > chunk_len {
        let mut end = chunk_len;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest
                .char_indices()
                .nth(1)
                .map_or(rest.len(), |(i, _)| i);
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

impl Session {
    /// Send `content` to `target`, split so that each line as relayed by the
    /// server (with our full prefix) fits in its line length.
    pub fn privmsg(&mut self, target: &str, content: &str) {
        let host_len = self.host.as_deref().map_or(MAX_HOST.len(), str::len);
        let overhead = ":!@ PRIVMSG  :\r\n".len()
            + self.nick.len()
            + self.user.len()
            + host_len
            + target.len();
        let budget = self.features.linelen.saturating_sub(overhead);
        for chunk in split_chunks(content, budget) {
            self.send(Message::new("PRIVMSG", [target, chunk]));
        }
        let target_cf = self.casemap(target);
        self.typing_limiter.clear(&target_cf);
    }

    /// Tell `target` we are typing. Rate limited per target.
    pub fn typing(&mut self, target: &str) {
        if !self.has_capability("message-tags") {
            return;
        }
        let target_cf = self.casemap(target);
        let now = self.now();
        if self.typing_limiter.active(&target_cf, now) {
            self.send(Message::new("TAGMSG", [target]).with_tag("+typing", "active"));
        }
    }

    /// Tell `target` we stopped typing, unless we already did.
    pub fn typing_stop(&mut self, target: &str) {
        if !self.has_capability("message-tags") {
            return;
        }
        let target_cf = self.casemap(target);
        let now = self.now();
        if self.typing_limiter.done(&target_cf, now) {
            self.send(Message::new("TAGMSG", [target]).with_tag("+typing", "done"));
        }
    }

    /// Ask for the read marker of `target`.
    pub fn read_get(&mut self, target: &str) {
        if self.has_capability("soju.im/read") {
            self.send(Message::new("READ", [target]));
        }
    }

    pub fn read_set(&mut self, target: &str, timestamp: DateTime<Utc>) {
        if self.has_capability("soju.im/read") {
            let timestamp = format_timestamp(timestamp);
            self.send(Message::new("READ", [target, timestamp.as_str()]));
        }
    }

    /// Start tracking the presence of `target`. The server is only told when
    /// it supports MONITOR; the whole list is sent once it says so.
    pub fn monitor_add(&mut self, target: &str) {
        let target_cf = self.casemap(target);
        if self.roster.add_monitor(&target_cf, target) && self.features.monitor {
            self.send(Message::new("MONITOR", ["+", target]));
        }
    }

    pub fn monitor_remove(&mut self, target: &str) {
        let target_cf = self.casemap(target);
        if self.roster.remove_monitor(&target_cf) && self.features.monitor {
            self.send(Message::new("MONITOR", ["-", target]));
        }
    }

    /// Search messages for `text`, optionally only in `target`.
    pub fn search(&mut self, target: Option<&str>, text: &str) {
        if !self.has_capability("soju.im/search") {
            return;
        }
        let mut attrs = BTreeMap::new();
        attrs.insert("text", text);
        if let Some(target) = target {
            attrs.insert("in", target);
        }
        self.send(Message::new("SEARCH", [format_tags(attrs)]));
    }

    pub fn join(&mut self, channel: &str, key: Option<&str>) {
        let channel_cf = self.casemap(channel);
        let now = self.now();
        self.pending_joins
            .insert(channel_cf, (channel.to_string(), now));
        let msg = match key {
            Some(key) => Message::new("JOIN", [channel, key]),
            None => Message::new("JOIN", [channel]),
        };
        self.send(msg);
    }

    pub fn part(&mut self, channel: &str, reason: Option<&str>) {
        let msg = match reason {
            Some(reason) => Message::new("PART", [channel, reason]),
            None => Message::new("PART", [channel]),
        };
        self.send(msg);
    }

    pub fn change_topic(&mut self, channel: &str, topic: &str) {
        self.send(Message::new("TOPIC", [channel, topic]));
    }

    pub fn quit(&mut self, reason: Option<&str>) {
        let msg = match reason {
            Some(reason) => Message::new("QUIT", [reason]),
            None => Message::new("QUIT", Vec::<String>::new()),
        };
        self.send(msg);
    }

    pub fn change_nick(&mut self, nick: &str) {
        self.send(Message::new("NICK", [nick]));
    }

    /// `change_mode("#chan", "+o", &["alice"])`
    pub fn change_mode(&mut self, channel: &str, flags: &str, args: &[&str]) {
        let params = [channel, flags].into_iter().chain(args.iter().copied());
        self.send(Message::new("MODE", params));
    }

    pub fn invite(&mut self, nick: &str, channel: &str) {
        self.send(Message::new("INVITE", [nick, channel]));
    }

    pub fn kick(&mut self, nick: &str, channel: &str, comment: Option<&str>) {
        let msg = match comment {
            Some(comment) => Message::new("KICK", [channel, nick, comment]),
            None => Message::new("KICK", [channel, nick]),
        };
        self.send(msg);
    }

    /// Send a line typed by the user as is. Unparsable lines are dropped.
    pub fn send_raw(&mut self, line: &str) {
        match Message::parse(line) {
            Ok(msg) => self.send(msg),
            Err(e) => tracing::warn!(error = %e, line, "not sending malformed raw line"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_limit_and_characters() {
        let text = "héllo wörld, ça va? ✓✓✓";
        for limit in 1..=text.len() + 1 {
            let chunks = split_chunks(text, limit);
            assert_eq!(chunks.concat(), text, "limit {limit}");
            for chunk in &chunks {
                assert!(!chunk.is_empty());
                assert!(
                    chunk.len() <= limit || chunk.chars().count() == 1,
                    "limit {limit}: {chunk:?}"
                );
            }
        }
    }

    #[test]
    fn zero_limit_sends_whole_text() {
        assert_eq!(split_chunks("abc", 0), vec!["abc"]);
        assert!(split_chunks("", 10).is_empty());
    }

    #[test]
    fn ascii_chunks_are_full() {
        assert_eq!(split_chunks("abcdefg", 3), vec!["abc", "def", "g"]);
    }
}
