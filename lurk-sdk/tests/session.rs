//! Session scenarios: scripted server lines in, events and client lines out.
//!
//! Tests cover:
//! - Registration burst, nick collisions, SASL (eager, deferred, failing)
//! - ISUPPORT application and casemapping changes
//! - Channel joins, parts, quits, nick changes, topics and modes
//! - Monitor lists and presence transitions, several targets per reply
//! - History, targets and search batches, nested batches, request in-flight guard
//! - Typing notifications, both directions
//! - Outbound shaping and session shutdown

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError};

use lurk_sdk::auth::AuthError;
use lurk_sdk::{
    Authenticator, Event, ManualClock, Message, MessageEvent, SaslPlain, Session, SessionError,
    SessionParams, Severity,
};

struct Harness {
    session: Session,
    rx: UnboundedReceiver<Message>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn connect(params: SessionParams) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = Arc::new(ManualClock::new());
        let session = Session::with_clock(tx, params, clock.clone());
        Self { session, rx, clock }
    }

    /// Connected, welcomed and past the first ISUPPORT, with nothing queued.
    fn registered() -> Self {
        let mut h = Self::connect(SessionParams::new("lurker"));
        h.feed(":srv 001 lurker :Welcome to the network");
        h.feed(":srv 005 lurker CHANTYPES=#& :are supported by this server");
        h.sent();
        h
    }

    fn try_feed(&mut self, line: &str) -> Result<Option<Event>, SessionError> {
        let msg = Message::parse(line).expect("valid line");
        self.session.handle_message(&msg)
    }

    fn feed(&mut self, line: &str) -> Option<Event> {
        self.try_feed(line).expect("message handled")
    }

    /// Lines queued since the last call.
    fn sent(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            lines.push(msg.to_string());
        }
        lines
    }

    fn ack(&mut self, caps: &str) {
        self.feed(&format!(":srv CAP lurker ACK :{caps}"));
        self.sent();
    }

    /// Join `channel` with `names` as the NAMES list, ending the join.
    fn join(&mut self, channel: &str, names: &str) -> Option<Event> {
        self.feed(&format!(":lurker!u@host JOIN {channel}"));
        self.feed(&format!(":srv 353 lurker = {channel} :lurker {names}"));
        let ev = self.feed(&format!(":srv 366 lurker {channel} :End of /NAMES list"));
        self.sent();
        ev
    }
}

fn ts(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap()
}

fn registration_burst() -> Vec<String> {
    let mut lines = vec!["CAP LS 302".to_string()];
    lines.extend(lurk_sdk::SUPPORTED_CAPABILITIES.iter().map(|c| format!("CAP REQ {c}")));
    lines.push("NICK lurker".into());
    lines.push("USER lurker 0 * lurker".into());
    lines
}

// ── Registration ────────────────────────────────────────────────────

#[test]
fn registration_burst_without_auth() {
    let mut h = Harness::connect(SessionParams::new("lurker"));
    let mut expected = registration_burst();
    expected.push("CAP END".into());
    expected.push("BOUNCER LISTNETWORKS".into());
    assert_eq!(h.sent(), expected);
    assert!(!h.session.is_registered());
}

#[test]
fn bound_network_binds_before_cap_end() {
    let mut params = SessionParams::new("lurker");
    params.net_id = Some("42".into());
    let mut h = Harness::connect(params);
    let sent = h.sent();
    assert_eq!(sent[sent.len() - 2..], ["BOUNCER BIND 42", "CAP END"]);
    assert_eq!(h.session.net_id(), Some("42"));
    // A bound connection doesn't list networks.
    assert_eq!(h.feed(":srv BOUNCER NETWORK 7 name=Other"), None);
}

#[test]
fn eager_sasl_is_pipelined() {
    let mut h = Harness::connect(SessionParams::new("lurker").with_auth(SaslPlain::new("acct", "pw")));
    let mut expected = registration_burst();
    expected.push("AUTHENTICATE PLAIN".into());
    expected.push("AUTHENTICATE YWNjdABhY2N0AHB3".into());
    expected.push("CAP END".into());
    expected.push("BOUNCER LISTNETWORKS".into());
    assert_eq!(h.sent(), expected);

    // The authenticator is gone: challenges are ignored.
    assert_eq!(h.feed("AUTHENTICATE +"), None);
    assert!(h.sent().is_empty());
}

/// PLAIN, but waiting for the server to ask.
struct Deferred(SaslPlain);

impl Authenticator for Deferred {
    fn mechanism(&self) -> &str {
        self.0.mechanism()
    }

    fn eager(&self) -> bool {
        false
    }

    fn respond(&mut self, challenge: &str) -> Result<String, AuthError> {
        self.0.respond(challenge)
    }
}

#[test]
fn deferred_sasl_waits_for_ack_and_success() {
    let auth = Deferred(SaslPlain::new("acct", "pw"));
    let mut h = Harness::connect(SessionParams::new("lurker").with_auth(auth));
    assert_eq!(h.sent(), registration_burst());

    h.feed(":srv CAP * ACK :sasl message-tags");
    assert!(h.session.has_capability("sasl"));
    assert!(h.session.has_capability("message-tags"));
    assert_eq!(h.sent(), ["AUTHENTICATE PLAIN"]);

    h.feed("AUTHENTICATE +");
    assert_eq!(h.sent(), ["AUTHENTICATE YWNjdABhY2N0AHB3"]);

    h.feed(":srv 900 lurker lurker!ident@cloak/lurker acct :You are now logged in as acct");
    assert_eq!(h.session.account(), Some("acct"));
    h.feed(":srv 903 lurker :SASL authentication successful");
    assert_eq!(h.sent(), ["CAP END", "BOUNCER LISTNETWORKS"]);

    // Host known from 900: no WHO for ourselves.
    h.feed(":srv 001 lurker :Welcome");
    assert!(h.sent().is_empty());
    assert!(h.session.is_registered());
}

#[test]
fn sasl_failure_still_registers() {
    let auth = Deferred(SaslPlain::new("acct", "wrong"));
    let mut h = Harness::connect(SessionParams::new("lurker").with_auth(auth));
    h.sent();
    h.feed(":srv CAP * ACK sasl");
    h.feed("AUTHENTICATE +");
    h.sent();

    let ev = h.feed(":srv 904 lurker :SASL authentication failed");
    assert_eq!(
        ev,
        Some(Event::Error {
            severity: Severity::Fail,
            code: "904".into(),
            message: "Registration failed: SASL authentication failed".into(),
        })
    );
    assert_eq!(h.sent(), ["CAP END", "BOUNCER LISTNETWORKS"]);

    // Ending negotiation happens once.
    h.feed(":srv 906 lurker :SASL authentication aborted");
    assert!(h.sent().is_empty());
}

#[test]
fn sasl_nak_does_not_stall() {
    let auth = Deferred(SaslPlain::new("acct", "pw"));
    let mut h = Harness::connect(SessionParams::new("lurker").with_auth(auth));
    h.sent();
    h.feed(":srv CAP * NAK :sasl");
    assert_eq!(h.sent(), ["CAP END", "BOUNCER LISTNETWORKS"]);
}

#[test]
fn nickname_collision_appends_underscore() {
    let mut h = Harness::connect(SessionParams::new("lurker"));
    h.sent();
    h.feed(":srv 433 * lurker :Nickname is already in use");
    assert_eq!(h.sent(), ["NICK lurker_"]);

    h.feed(":srv 001 lurker_ :Welcome");
    assert_eq!(h.session.nick(), "lurker_");
    assert!(h.session.is_me("LURKER_"));
    assert_eq!(h.sent(), ["WHO lurker_"]);
}

#[test]
fn registered_event_once() {
    let mut h = Harness::connect(SessionParams::new("lurker"));
    assert_eq!(h.feed(":srv 005 lurker CHANTYPES=# :are supported"), None);
    assert_eq!(h.feed(":srv 001 lurker :Welcome"), None);
    assert_eq!(h.feed(":srv 005 lurker LINELEN=400 :are supported"), Some(Event::Registered));
    assert_eq!(h.feed(":srv 005 lurker MONITOR=10 :are supported"), None);
    assert_eq!(h.session.features().linelen, 400);

    assert_eq!(
        h.try_feed(":srv 005 lurker"),
        Err(SessionError::NotEnoughParams {
            command: "005".into(),
            expected: 3,
            got: 1,
        })
    );
}

#[test]
fn isupport_dialect() {
    let mut h = Harness::registered();
    h.feed(":srv 005 lurker CASEMAPPING=ascii PREFIX=(ov)@+ LINELEN=300 :are supported");
    let features = h.session.features();
    assert_eq!(features.casemapping, lurk_sdk::Casemapping::Ascii);
    assert_eq!(features.prefix_modes, "ov");
    assert_eq!(features.prefix_symbols, "@+");
    assert_eq!(features.linelen, 300);
    assert_eq!(h.session.casemap("Foo[]"), "foo[]");
}

#[test]
fn casemapping_change_rekeys_state() {
    let mut h = Harness::registered();
    h.feed(":lurker!u@host JOIN #Chan[1]");
    h.feed(":srv 353 lurker = #Chan[1] :lurker W[x]");
    h.feed(":srv 005 lurker CASEMAPPING=ascii :are supported");

    let ev = h.feed(":srv 366 lurker #chan[1] :End of /NAMES list");
    assert_eq!(
        ev,
        Some(Event::SelfJoin {
            channel: "#Chan[1]".into(),
            requested: false,
            topic: String::new(),
        })
    );
    let names: Vec<String> = h.session.names("#CHAN[1]").into_iter().map(|m| m.name.name).collect();
    assert_eq!(names, ["lurker", "W[x]"]);
    assert_eq!(h.session.channels_shared_with("w[X]"), ["#Chan[1]"]);
    // Only brackets distinguish these under rfc1459, not under ascii.
    assert!(h.session.names("#chan{1}").is_empty());
}

// ── Channels ────────────────────────────────────────────────────────

#[test]
fn self_join_completes_once() {
    let mut h = Harness::registered();
    h.session.join("#lurk", None);
    assert_eq!(h.sent(), ["JOIN #lurk"]);

    h.feed(":lurker!u@host JOIN #lurk");
    h.feed(":srv 332 lurker #lurk :Lurk more");
    h.feed(":srv 333 lurker #lurk alice!a@host 1700000000");
    h.feed(":srv 353 lurker = #lurk :lurker @alice +bob");
    let ev = h.feed(":srv 366 lurker #lurk :End of /NAMES list");
    assert_eq!(
        ev,
        Some(Event::SelfJoin {
            channel: "#lurk".into(),
            requested: true,
            topic: "Lurk more".into(),
        })
    );
    assert_eq!(h.feed(":srv 366 lurker #lurk :End of /NAMES list"), None);

    let (topic, who, at) = h.session.topic("#LURK").unwrap();
    assert_eq!(topic, "Lurk more");
    assert_eq!(who.unwrap().name, "alice");
    assert_eq!(at, Utc.timestamp_opt(1_700_000_000, 0).single());

    let names: Vec<(String, String)> = h
        .session
        .names("#lurk")
        .into_iter()
        .map(|m| (m.power_level, m.name.name))
        .collect();
    assert_eq!(
        names,
        [
            ("@".to_string(), "alice".to_string()),
            ("+".to_string(), "bob".to_string()),
            (String::new(), "lurker".to_string()),
        ]
    );
}

#[test]
fn late_join_is_not_requested() {
    let mut h = Harness::registered();
    h.session.join("#lurk", Some("key"));
    assert_eq!(h.sent(), ["JOIN #lurk key"]);
    h.clock.advance(Duration::from_secs(6));
    let ev = h.join("#lurk", "");
    assert!(matches!(ev, Some(Event::SelfJoin { requested: false, .. })));
}

#[test]
fn away_notify_join_asks_who() {
    let mut h = Harness::registered();
    h.ack("away-notify");
    h.feed(":lurker!u@host JOIN #lurk");
    assert_eq!(h.sent(), ["WHO #lurk"]);

    h.feed(":srv 353 lurker = #lurk :lurker alice");
    h.feed(":srv 352 lurker #lurk a host srv alice G :0 Alice");
    assert!(h.session.names("#lurk")[0].away);
    h.feed(":alice!a@host AWAY");
    assert!(!h.session.names("#lurk")[0].away);
    h.feed(":alice!a@host AWAY :lunch");
    assert!(h.session.names("#lurk")[0].away);
}

#[test]
fn users_leave_and_are_forgotten() {
    let mut h = Harness::registered();
    h.join("#a", "alice bob");
    h.session.monitor_add("bob");

    let ev = h.feed("@time=2024-01-01T00:00:05.000Z :alice!a@host PART #a :bye");
    assert_eq!(
        ev,
        Some(Event::UserPart {
            user: "alice".into(),
            channel: "#a".into(),
            time: ts(5),
        })
    );
    h.feed(":op!o@host KICK #a bob :out");
    assert!(!h.session.users().contains(&"alice".to_string()));
    assert!(h.session.users().contains(&"bob".to_string()));

    assert_eq!(
        h.feed(":lurker!u@host PART #a"),
        Some(Event::SelfPart { channel: "#a".into() })
    );
    assert!(h.session.channels().is_empty());
    assert!(h.session.users().contains(&"bob".to_string()));

    // Untracked channels and users are ignored.
    assert_eq!(h.feed(":carol!c@host PART #a"), None);
    assert_eq!(h.feed(":lurker!u@host PART #nowhere"), None);
}

#[test]
fn joins_to_untracked_channels_are_ignored() {
    let mut h = Harness::registered();
    assert_eq!(h.feed(":alice!a@host JOIN #elsewhere"), None);
    assert!(h.session.users().iter().all(|u| u != "alice"));

    h.join("#a", "");
    let ev = h.feed("@time=2024-01-01T00:00:01.000Z :alice!a@host JOIN #A");
    assert_eq!(
        ev,
        Some(Event::UserJoin {
            user: "alice".into(),
            channel: "#a".into(),
            time: ts(1),
        })
    );
}

#[test]
fn quit_lists_shared_channels() {
    let mut h = Harness::registered();
    h.join("#b", "alice");
    h.join("#a", "alice");
    assert_eq!(h.session.channels_shared_with("ALICE"), ["#a", "#b"]);

    let ev = h.feed("@time=2024-01-01T00:00:09.000Z :alice!a@host QUIT :Ping timeout");
    assert_eq!(
        ev,
        Some(Event::UserQuit {
            user: "alice".into(),
            channels: vec!["#a".into(), "#b".into()],
            time: ts(9),
        })
    );
    assert!(h.session.channels_shared_with("alice").is_empty());
    assert_eq!(h.feed(":alice!a@host QUIT"), None);
}

#[test]
fn nick_changes() {
    let mut h = Harness::registered();
    h.join("#a", "@alice");

    let ev = h.feed("@time=2024-01-01T00:00:02.000Z :alice!a@host NICK alicia");
    assert_eq!(
        ev,
        Some(Event::UserNick {
            user: "alicia".into(),
            former_nick: "alice".into(),
            time: ts(2),
        })
    );
    let alicia = &h.session.names("#a")[0];
    assert_eq!((alicia.power_level.as_str(), alicia.name.name.as_str()), ("@", "alicia"));

    assert_eq!(
        h.feed(":lurker!u@host NICK lurk"),
        Some(Event::SelfNick { former_nick: "lurker".into() })
    );
    assert_eq!(h.session.nick(), "lurk");
    assert_eq!(h.session.nick_cf(), "lurk");

    assert_eq!(h.feed(":ghost!g@host NICK spirit"), None);
}

#[test]
fn own_nick_tracked_outside_channels() {
    let mut h = Harness::registered();
    h.join("#a", "alice");
    assert_eq!(
        h.feed(":lurker!u@host PART #a"),
        Some(Event::SelfPart { channel: "#a".into() })
    );
    assert!(h.session.users().contains(&"lurker".to_string()));

    assert_eq!(
        h.feed(":lurker!u@host NICK newnick"),
        Some(Event::SelfNick { former_nick: "lurker".into() })
    );
    assert_eq!(h.session.nick(), "newnick");
    assert!(h.session.is_me("NEWNICK"));
    assert!(!h.session.is_me("lurker"));
    assert_eq!(h.session.users(), ["newnick"]);

    assert_eq!(h.feed(":newnick!u@host JOIN #b"), None);
    assert_eq!(h.session.channels(), ["#b"]);
}

#[test]
fn membership_modes() {
    let mut h = Harness::registered();
    h.join("#a", "+alice bob");

    let ev = h.feed("@time=2024-01-01T00:00:03.000Z :op!o@host MODE #a +o-v+b alice bob *!*@spam");
    assert_eq!(
        ev,
        Some(Event::ModeChange {
            channel: "#a".into(),
            mode: "+o-v+b alice bob *!*@spam".into(),
            time: ts(3),
        })
    );
    let levels: Vec<(String, String)> = h
        .session
        .names("#a")
        .into_iter()
        .map(|m| (m.name.name, m.power_level))
        .collect();
    assert_eq!(
        levels,
        [
            ("alice".to_string(), "@+".to_string()),
            ("bob".to_string(), String::new()),
            ("lurker".to_string(), String::new()),
        ]
    );

    // Repeating a mode doesn't duplicate the symbol; non-members are skipped.
    h.feed(":op!o@host MODE #a +oo alice nobody");
    assert_eq!(h.session.names("#a")[0].power_level, "@+");
}

#[test]
fn malformed_mode_leaves_state_alone() {
    let mut h = Harness::registered();
    h.join("#a", "alice");
    assert_eq!(
        h.try_feed(":op!o@host MODE #a +vo alice"),
        Err(SessionError::MissingModeArgument {
            channel: "#a".into(),
            mode: 'o',
        })
    );
    assert_eq!(h.session.names("#a")[0].power_level, "");
}

#[test]
fn topic_changes() {
    let mut h = Harness::registered();
    h.join("#a", "");
    let ev = h.feed("@time=2024-01-01T00:00:04.000Z :alice!a@host TOPIC #A :new topic");
    assert_eq!(
        ev,
        Some(Event::TopicChange {
            channel: "#a".into(),
            topic: "new topic".into(),
            time: ts(4),
        })
    );
    let (topic, who, at) = h.session.topic("#a").unwrap();
    assert_eq!(topic, "new topic");
    assert_eq!(who.unwrap().name, "alice");
    assert_eq!(at, Some(ts(4)));

    h.feed(":srv 333 lurker #a alice!a@host soon");
    assert_eq!(h.session.topic("#a").unwrap().2, Some(DateTime::<Utc>::UNIX_EPOCH));
    h.feed(":srv 331 lurker #a :No topic is set");
    assert_eq!(h.session.topic("#a").unwrap().0, "");
    assert_eq!(h.feed(":alice!a@host TOPIC #b :elsewhere"), None);
}

#[test]
fn multi_prefix_refreshes_names() {
    let mut h = Harness::registered();
    h.join("#b", "");
    h.join("#a", "");
    h.feed(":srv CAP lurker ACK :multi-prefix");
    assert_eq!(h.sent(), ["NAMES #a", "NAMES #b"]);
}

#[test]
fn invites() {
    let mut h = Harness::registered();
    assert_eq!(
        h.feed(":alice!a@host INVITE lurker #secret"),
        Some(Event::Invite {
            inviter: "alice".into(),
            invitee: "lurker".into(),
            channel: "#secret".into(),
        })
    );
    assert_eq!(
        h.feed(":srv 341 lurker bob #a"),
        Some(Event::Invite {
            inviter: "lurker".into(),
            invitee: "bob".into(),
            channel: "#a".into(),
        })
    );
}

// ── Monitor ─────────────────────────────────────────────────────────

#[test]
fn monitor_list_and_presence() {
    let mut h = Harness::registered();
    h.session.monitor_add("Bob");
    h.session.monitor_add("dave");
    assert!(h.sent().is_empty());

    h.feed(":srv 005 lurker MONITOR=100 :are supported");
    assert_eq!(h.sent(), ["MONITOR + Bob,dave"]);

    assert_eq!(
        h.feed(":srv 731 lurker :Bob"),
        Some(Event::UserOffline { user: "Bob".into() })
    );
    assert_eq!(h.feed(":srv 731 lurker :Bob"), None);
    assert_eq!(
        h.feed(":srv 730 lurker :carol!c@host,BOB!b@host"),
        Some(Event::UserOnline { user: "Bob".into() })
    );
    assert!(!h.session.names("bob")[0].disconnected);
    assert_eq!(h.feed(":srv 734 lurker 100 eve :Monitor list is full"), None);

    h.session.monitor_add("bob");
    assert!(h.sent().is_empty());
    h.session.monitor_remove("BOB");
    assert_eq!(h.sent(), ["MONITOR - BOB"]);
    assert!(h.session.names("bob").is_empty());
}

#[test]
fn monitor_status_updates_every_listed_target() {
    let mut h = Harness::registered();
    h.session.monitor_add("a");
    h.session.monitor_add("b");

    assert_eq!(
        h.feed(":srv 731 lurker :a,b"),
        Some(Event::UserOffline { user: "a".into() })
    );
    assert!(h.session.names("a")[0].disconnected);
    assert!(h.session.names("b")[0].disconnected);
    assert_eq!(h.feed(":srv 731 lurker :b"), None);

    assert_eq!(
        h.feed(":srv 730 lurker :b!u@host,a!u@host"),
        Some(Event::UserOnline { user: "b".into() })
    );
    assert!(!h.session.names("a")[0].disconnected);
    assert!(!h.session.names("b")[0].disconnected);
}

// ── Messages and typing ─────────────────────────────────────────────

#[test]
fn messages_resolve_channel_names() {
    let mut h = Harness::registered();
    h.join("#Lurk", "alice");
    let ev = h.feed("@time=2024-01-01T00:00:06.000Z :alice!a@host PRIVMSG #lurk :hello there");
    assert_eq!(
        ev,
        Some(Event::Message(MessageEvent {
            user: "alice".into(),
            target: "#Lurk".into(),
            target_is_channel: true,
            command: "PRIVMSG".into(),
            content: "hello there".into(),
            time: ts(6),
        }))
    );
    let ev = h.feed("@time=2024-01-01T00:00:06.000Z :alice!a@host NOTICE lurker :psst");
    assert_eq!(
        ev,
        Some(Event::Message(MessageEvent {
            user: "alice".into(),
            target: "lurker".into(),
            target_is_channel: false,
            command: "NOTICE".into(),
            content: "psst".into(),
            time: ts(6),
        }))
    );
    assert!(matches!(
        h.try_feed("PRIVMSG #lurk :anonymous"),
        Err(SessionError::MissingPrefix(_))
    ));
}

#[test]
fn outgoing_typing_is_deduplicated() {
    let mut h = Harness::registered();
    h.session.typing("#a");
    assert!(h.sent().is_empty(), "needs message-tags");

    h.ack("message-tags");
    h.session.typing("#a");
    h.session.typing("#A");
    assert_eq!(h.sent(), ["@+typing=active TAGMSG #a"]);

    h.clock.advance(Duration::from_secs(3));
    h.session.typing("#a");
    assert_eq!(h.sent(), ["@+typing=active TAGMSG #a"]);

    h.session.typing_stop("#a");
    h.session.typing_stop("#a");
    assert_eq!(h.sent(), ["@+typing=done TAGMSG #a"]);

    // Sending a message starts the target over.
    h.session.typing("#a");
    h.sent();
    h.session.privmsg("#a", "done typing");
    h.session.typing("#a");
    assert_eq!(h.sent(), ["PRIVMSG #a :done typing", "@+typing=active TAGMSG #a"]);
}

#[test]
fn incoming_typing_notifications() {
    let mut h = Harness::registered();
    h.join("#a", "alice bob");
    h.feed("@+typing=active :alice!a@host TAGMSG #a");
    h.feed("@+typing=active :bob!b@host TAGMSG #a");
    h.feed("@+typing=active :lurker!u@host TAGMSG #a");
    assert_eq!(h.session.typings("#A"), ["alice", "bob"]);

    h.feed("@+typing=paused :bob!b@host TAGMSG #a");
    assert_eq!(h.session.typings("#a"), ["alice"]);
    h.feed(":alice!a@host PRIVMSG #a :hi");
    assert!(h.session.typings("#a").is_empty());

    // Private conversations are keyed by the other party.
    h.feed("@+typing=active :alice!a@host TAGMSG lurker");
    assert_eq!(h.session.typings("alice"), ["alice"]);
    h.clock.advance(Duration::from_secs(7));
    assert!(h.session.typings("alice").is_empty());
}

#[test]
fn privmsg_is_split_to_fit_the_line() {
    let mut h = Harness::registered();
    h.feed(":srv 005 lurker LINELEN=100 :are supported");
    // 100 - len(":!@ PRIVMSG  :\r\n") - nick - user - max host - target
    let budget = 100 - 16 - 6 - 6 - 15 - 5;

    let text = "é€a".repeat(30);
    h.session.privmsg("#lurk", &text);
    let chunks: Vec<String> = h
        .sent()
        .iter()
        .map(|line| Message::parse(line).unwrap().params[1].clone())
        .collect();
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.len() <= budget), "{chunks:?}");
    assert_eq!(chunks.concat(), text);
}

#[test]
fn read_markers_and_search_need_caps() {
    let mut h = Harness::registered();
    h.session.read_get("#a");
    h.session.search(None, "x");
    assert!(h.sent().is_empty());

    h.ack("soju.im/read soju.im/search");
    h.session.read_get("#a");
    h.session.read_set("#a", ts(7));
    h.session.search(Some("#a"), "needle hay");
    assert_eq!(
        h.sent(),
        [
            "READ #a",
            "READ #a timestamp=2024-01-01T00:00:07.000Z",
            "SEARCH in=#a;text=needle\\shay",
        ]
    );

    assert_eq!(
        h.feed(":srv READ #a timestamp=2024-01-01T00:00:07.000Z"),
        Some(Event::Read {
            target: "#a".into(),
            timestamp: ts(7),
        })
    );
    assert_eq!(h.feed(":srv READ #a *"), None);
}

// ── Batches ─────────────────────────────────────────────────────────

#[test]
fn history_requests_wait_for_their_batch() {
    let mut h = Harness::registered();
    h.session.history("#a").before(ts(0));
    assert!(h.sent().is_empty(), "needs draft/chathistory");

    h.ack("draft/chathistory batch");
    h.session.history("#a").with_limit(20).before(ts(0));
    h.session.history("#A").before(ts(0));
    assert_eq!(h.sent(), ["CHATHISTORY BEFORE #a timestamp=2024-01-01T00:00:00.000Z 20"]);

    h.feed(":srv BATCH +h1 chathistory #a");
    assert_eq!(
        h.feed("@batch=h1;time=2024-01-01T00:00:01.000Z :alice!a@host JOIN #a"),
        None
    );
    assert_eq!(
        h.feed("@batch=h1;time=2024-01-01T00:00:02.000Z :alice!a@host PRIVMSG #a :old news"),
        None
    );
    // Played back joins don't touch the roster.
    assert!(h.session.channels().is_empty());

    let ev = h.feed(":srv BATCH -h1");
    assert_eq!(
        ev,
        Some(Event::History {
            target: "#a".into(),
            events: vec![
                Event::UserJoin {
                    user: "alice".into(),
                    channel: "#a".into(),
                    time: ts(1),
                },
                Event::Message(MessageEvent {
                    user: "alice".into(),
                    target: "#a".into(),
                    target_is_channel: false,
                    command: "PRIVMSG".into(),
                    content: "old news".into(),
                    time: ts(2),
                }),
            ],
        })
    );

    h.session.history("#a").with_limit(500).after(ts(2));
    assert_eq!(h.sent(), ["CHATHISTORY AFTER #a timestamp=2024-01-01T00:00:02.000Z 100"]);
}

#[test]
fn history_targets_batch() {
    let mut h = Harness::registered();
    h.ack("draft/chathistory");
    h.session.history("ignored").targets(ts(0), ts(59));
    h.session.history("").targets(ts(0), ts(59));
    assert_eq!(
        h.sent(),
        ["CHATHISTORY TARGETS timestamp=2024-01-01T00:00:00.000Z timestamp=2024-01-01T00:00:59.000Z 100"]
    );

    h.feed(":srv BATCH +t draft/chathistory-targets");
    h.feed("@batch=t :srv CHATHISTORY TARGETS #a 2024-01-01T00:00:10.000Z");
    h.feed("@batch=t :srv CHATHISTORY TARGETS bob timestamp=2024-01-01T00:00:11.000Z");
    h.feed("@batch=t :srv CHATHISTORY TARGETS carol whenever");
    let ev = h.feed(":srv BATCH -t");
    assert_eq!(
        ev,
        Some(Event::HistoryTargets {
            targets: BTreeMap::from([("#a".to_string(), ts(10)), ("bob".to_string(), ts(11))]),
        })
    );

    h.session.history("").targets(ts(0), ts(59));
    assert_eq!(h.sent().len(), 1);
}

#[test]
fn search_batch() {
    let mut h = Harness::registered();
    h.feed(":srv BATCH +s soju.im/search");
    h.feed("@batch=s;time=2024-01-01T00:00:08.000Z :alice!a@host PRIVMSG #a :needle");
    let ev = h.feed(":srv BATCH -s");
    assert_eq!(
        ev,
        Some(Event::Search {
            messages: vec![MessageEvent {
                user: "alice".into(),
                target: "#a".into(),
                target_is_channel: false,
                command: "PRIVMSG".into(),
                content: "needle".into(),
                time: ts(8),
            }],
        })
    );
}

#[test]
fn batch_edge_cases() {
    let mut h = Harness::registered();
    assert_eq!(h.try_feed(":srv BATCH +"), Err(SessionError::EmptyBatchId));
    assert_eq!(h.feed(":srv BATCH -unknown"), None);

    // Unrelated batches pass their messages through.
    h.feed(":srv BATCH +n netsplit irc.a irc.b");
    let ev = h.feed("@batch=n :alice!a@host INVITE lurker #x");
    assert!(matches!(ev, Some(Event::Invite { .. })));
    assert_eq!(h.feed(":srv BATCH -n"), None);
}

#[test]
fn nested_batches_are_opened_once() {
    let mut h = Harness::registered();
    h.feed(":srv BATCH +outer chathistory #a");
    assert_eq!(h.feed("@batch=outer :srv BATCH +inner chathistory #b"), None);
    h.feed("@batch=inner;time=2024-01-01T00:00:03.000Z :alice!a@host PRIVMSG #b :nested");

    let ev = h.feed("@batch=outer :srv BATCH -inner");
    assert_eq!(
        ev,
        Some(Event::History {
            target: "#b".into(),
            events: vec![Event::Message(MessageEvent {
                user: "alice".into(),
                target: "#b".into(),
                target_is_channel: false,
                command: "PRIVMSG".into(),
                content: "nested".into(),
                time: ts(3),
            })],
        })
    );
    assert_eq!(
        h.feed(":srv BATCH -outer"),
        Some(Event::History {
            target: "#a".into(),
            events: Vec::new(),
        })
    );

    // BATCH lines inside a targets batch are not target entries.
    h.feed(":srv BATCH +t draft/chathistory-targets");
    assert_eq!(h.try_feed("@batch=t :srv BATCH +n netsplit irc.a irc.b"), Ok(None));
    assert_eq!(h.try_feed("@batch=t :srv BATCH -n"), Ok(None));
    assert_eq!(
        h.feed(":srv BATCH -t"),
        Some(Event::HistoryTargets {
            targets: BTreeMap::new(),
        })
    );
}

// ── Replies and shutdown ────────────────────────────────────────────

#[test]
fn server_replies_become_events() {
    let mut h = Harness::registered();
    assert_eq!(h.feed(":srv 421 lurker BOUNCER :Unknown command"), None);
    assert_eq!(
        h.feed(":srv 482 lurker #a :You're not channel operator"),
        Some(Event::Error {
            severity: Severity::Fail,
            code: "482".into(),
            message: "#a You're not channel operator".into(),
        })
    );
    assert_eq!(
        h.feed(":srv FAIL CHATHISTORY INVALID_TARGET #x :No such target"),
        Some(Event::Error {
            severity: Severity::Fail,
            code: "INVALID_TARGET".into(),
            message: "#x No such target".into(),
        })
    );
    assert_eq!(
        h.feed(":srv WARN REHASH CERTS_EXPIRED :Certificate expired"),
        Some(Event::Error {
            severity: Severity::Warn,
            code: "CERTS_EXPIRED".into(),
            message: "Certificate expired".into(),
        })
    );
    assert!(matches!(
        h.feed(":srv 372 lurker :- message of the day"),
        Some(Event::Error { severity: Severity::Note, .. })
    ));
    assert_eq!(h.feed(":srv FROB lurker"), None);
}

#[test]
fn bouncer_networks_and_caps() {
    let mut h = Harness::registered();
    assert_eq!(
        h.feed(":srv BOUNCER NETWORK 42 name=Libera\\sChat;state=connected"),
        Some(Event::BouncerNetwork {
            id: "42".into(),
            name: Some("Libera Chat".into()),
        })
    );
    assert_eq!(
        h.feed(":srv BOUNCER NETWORK 42 *"),
        Some(Event::BouncerNetwork {
            id: "42".into(),
            name: None,
        })
    );

    h.feed(":srv CAP lurker LS * :sasl=PLAIN,EXTERNAL batch");
    h.feed(":srv CAP lurker LS :unknown-cap");
    assert_eq!(h.session.available_capability("sasl"), Some(Some("PLAIN,EXTERNAL")));
    assert_eq!(h.session.available_capability("unknown-cap"), Some(None));

    h.ack("batch");
    h.feed(":srv CAP lurker NEW :soju.im/read batch other/cap");
    assert_eq!(h.sent(), ["CAP REQ soju.im/read"]);
    h.feed(":srv CAP lurker DEL :batch");
    assert!(!h.session.has_capability("batch"));
    assert_eq!(h.session.available_capability("batch"), None);
}

#[test]
fn ping_and_plain_builders() {
    let mut h = Harness::registered();
    h.feed("PING :irc.example.org");
    h.session.part("#a", Some("bye now"));
    h.session.part("#b", None);
    h.session.change_topic("#a", "fresh");
    h.session.change_nick("lurk2");
    h.session.change_mode("#a", "+ov", &["alice", "bob"]);
    h.session.invite("bob", "#a");
    h.session.kick("bob", "#a", None);
    h.session.kick("bob", "#a", Some("spam"));
    h.session.send_raw("WHOIS alice");
    h.session.send_raw("");
    h.session.quit(Some("see you"));
    assert_eq!(
        h.sent(),
        [
            "PONG irc.example.org",
            "PART #a :bye now",
            "PART #b",
            "TOPIC #a fresh",
            "NICK lurk2",
            "MODE #a +ov alice bob",
            "INVITE bob #a",
            "KICK #a bob",
            "KICK #a bob spam",
            "WHOIS alice",
            "QUIT :see you",
        ]
    );
}

#[test]
fn close_is_idempotent() {
    let mut h = Harness::registered();
    h.session.close();
    h.session.close();
    assert!(h.session.is_closed());

    h.session.privmsg("#a", "into the void");
    assert_eq!(h.rx.try_recv().unwrap_err(), TryRecvError::Disconnected);
}

#[test]
fn error_closes_the_session() {
    let mut h = Harness::registered();
    assert_eq!(h.feed("ERROR :Closing Link: lurker (Quit)"), None);
    assert!(h.session.is_closed());
    assert_eq!(h.rx.try_recv().unwrap_err(), TryRecvError::Disconnected);
}

#[test]
fn malformed_messages_are_errors() {
    let mut h = Harness::registered();
    assert_eq!(
        h.try_feed(":op!o@host KICK #c"),
        Err(SessionError::NotEnoughParams {
            command: "KICK".into(),
            expected: 2,
            got: 1,
        })
    );
    assert!(matches!(h.try_feed("JOIN #c"), Err(SessionError::MissingPrefix(_))));
    assert!(h.try_feed(":srv 353 lurker = #c").is_err());
}
