//! Reassembly of chat history, history-targets and search batches.
//!
//! History batches are keyed by their server id and several can be open at
//! once. Targets and search batches produce differently shaped results and
//! are singletons: opening a new one abandons the previous.
//!
//! The tracker also holds the in-flight guard for CHATHISTORY requests, so a
//! target is only requested again once its batch closed.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::casemap::Casemapping;
use crate::event::{Event, MessageEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    History,
    Targets,
    Search,
}

/// The content of a batch that just closed.
#[derive(Debug, Clone, PartialEq)]
pub enum Closed {
    History { target: String, events: Vec<Event> },
    Targets(BTreeMap<String, DateTime<Utc>>),
    Search(Vec<MessageEvent>),
}

#[derive(Debug)]
struct HistoryBatch {
    target: String,
    events: Vec<Event>,
}

#[derive(Debug, Default)]
pub struct Batches {
    history: HashMap<String, HistoryBatch>,
    targets: Option<(String, BTreeMap<String, DateTime<Utc>>)>,
    search: Option<(String, Vec<MessageEvent>)>,
    /// Casemapped target → target, for each CHATHISTORY request outstanding.
    /// The empty string stands for TARGETS.
    in_flight: HashMap<String, String>,
}

impl Batches {
    /// Kind of the open batch `id`, if any.
    pub fn kind(&self, id: &str) -> Option<BatchKind> {
        if self.history.contains_key(id) {
            Some(BatchKind::History)
        } else if self.targets.as_ref().is_some_and(|(open, _)| open == id) {
            Some(BatchKind::Targets)
        } else if self.search.as_ref().is_some_and(|(open, _)| open == id) {
            Some(BatchKind::Search)
        } else {
            None
        }
    }

    /// Open a history batch for `target`. False if `id` is already open.
    pub fn open_history(&mut self, id: &str, target: &str) -> bool {
        if self.kind(id).is_some() {
            return false;
        }
        self.history.insert(
            id.to_string(),
            HistoryBatch {
                target: target.to_string(),
                events: Vec::new(),
            },
        );
        true
    }

    pub fn open_targets(&mut self, id: &str) -> bool {
        if self.kind(id).is_some() {
            return false;
        }
        if let Some((previous, _)) = &self.targets {
            tracing::debug!(previous = %previous, id, "replacing unfinished targets batch");
        }
        self.targets = Some((id.to_string(), BTreeMap::new()));
        true
    }

    pub fn open_search(&mut self, id: &str) -> bool {
        if self.kind(id).is_some() {
            return false;
        }
        if let Some((previous, _)) = &self.search {
            tracing::debug!(previous = %previous, id, "replacing unfinished search batch");
        }
        self.search = Some((id.to_string(), Vec::new()));
        true
    }

    pub fn push_history(&mut self, id: &str, event: Event) {
        if let Some(batch) = self.history.get_mut(id) {
            batch.events.push(event);
        }
    }

    pub fn push_target(&mut self, target: &str, time: DateTime<Utc>) {
        if let Some((_, targets)) = &mut self.targets {
            targets.insert(target.to_string(), time);
        }
    }

    pub fn push_search(&mut self, message: MessageEvent) {
        if let Some((_, messages)) = &mut self.search {
            messages.push(message);
        }
    }

    /// Close batch `id`. Unknown ids yield `None`.
    pub fn close(&mut self, id: &str) -> Option<Closed> {
        if let Some(batch) = self.history.remove(id) {
            return Some(Closed::History {
                target: batch.target,
                events: batch.events,
            });
        }
        if self.targets.as_ref().is_some_and(|(open, _)| open == id) {
            return self.targets.take().map(|(_, targets)| Closed::Targets(targets));
        }
        if self.search.as_ref().is_some_and(|(open, _)| open == id) {
            return self.search.take().map(|(_, messages)| Closed::Search(messages));
        }
        None
    }

    /// Mark a request for `target` as in flight. False if one already is.
    pub fn begin_request(&mut self, target_cf: &str, target: &str) -> bool {
        if self.in_flight.contains_key(target_cf) {
            return false;
        }
        self.in_flight
            .insert(target_cf.to_string(), target.to_string());
        true
    }

    pub fn finish_request(&mut self, target_cf: &str) {
        self.in_flight.remove(target_cf);
    }

    /// Recompute in-flight keys after a casemapping change.
    pub fn rekey(&mut self, casemapping: Casemapping) {
        let in_flight = std::mem::take(&mut self.in_flight);
        self.in_flight = in_flight
            .into_values()
            .map(|target| (casemapping.apply(&target), target))
            .collect();
    }
}
