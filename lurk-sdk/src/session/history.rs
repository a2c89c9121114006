//! CHATHISTORY requests.

use chrono::{DateTime, Utc};

use crate::irc::{Message, format_timestamp};

use super::Session;

/// A pending CHATHISTORY request, sent by one of its terminal methods.
///
/// Nothing is sent without `draft/chathistory`, nor while the previous
/// request for the same target has not been answered.
#[must_use = "a history request is only sent by after(), before() or targets()"]
pub struct HistoryRequest<'a> {
    session: &'a mut Session,
    target: String,
    limit: usize,
}

impl Session {
    /// Start a history request for `target`, limited to the server maximum.
    pub fn history(&mut self, target: &str) -> HistoryRequest<'_> {
        let limit = self.features.history_limit;
        HistoryRequest {
            session: self,
            target: target.to_string(),
            limit,
        }
    }
}

impl HistoryRequest<'_> {
    /// Ask for at most `limit` messages; the server maximum still applies.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.min(self.session.features.history_limit);
        self
    }

    /// Messages after `t`.
    pub fn after(self, t: DateTime<Utc>) {
        self.send("AFTER", vec![format_timestamp(t)]);
    }

    /// Messages before `t`.
    pub fn before(self, t: DateTime<Utc>) {
        self.send("BEFORE", vec![format_timestamp(t)]);
    }

    /// Conversations with activity between `start` and `end`. The request
    /// target is ignored.
    pub fn targets(mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.target.clear();
        self.send(
            "TARGETS",
            vec![format_timestamp(start), format_timestamp(end)],
        );
    }

    fn send(self, subcommand: &str, bounds: Vec<String>) {
        let session = self.session;
        if !session.has_capability("draft/chathistory") {
            return;
        }
        let target_cf = session.casemap(&self.target);
        if !session.batches.begin_request(&target_cf, &self.target) {
            tracing::debug!(target_cf = %target_cf, "history request already in flight");
            return;
        }

        let mut params = vec![subcommand.to_string()];
        if !self.target.is_empty() {
            params.push(self.target);
        }
        params.extend(bounds);
        params.push(self.limit.to_string());
        session.send(Message::new("CHATHISTORY", params));
    }
}
