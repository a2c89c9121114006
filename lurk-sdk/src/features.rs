//! ISUPPORT (`005`) feature table.
//!
//! The table starts with RFC 1459 defaults and is refined by every ISUPPORT
//! reply. Everything that casemaps, parses modes or sizes outgoing lines reads
//! from here.

use crate::casemap::Casemapping;

pub const DEFAULT_LINELEN: usize = 512;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    pub casemapping: Casemapping,
    /// `CHANMODES` classes A (list), B (always a parameter), C (parameter
    /// when set), D (never a parameter).
    pub chanmodes: [String; 4],
    pub chantypes: String,
    pub linelen: usize,
    pub history_limit: usize,
    /// Membership symbols by rank, highest first; index-aligned with
    /// `prefix_modes`.
    pub prefix_symbols: String,
    pub prefix_modes: String,
    pub monitor: bool,
    /// Bouncer network this connection is bound to.
    pub net_id: Option<String>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            casemapping: Casemapping::default(),
            chanmodes: Default::default(),
            chantypes: "#&".to_string(),
            linelen: DEFAULT_LINELEN,
            history_limit: DEFAULT_HISTORY_LIMIT,
            prefix_symbols: "@+".to_string(),
            prefix_modes: "ov".to_string(),
            monitor: false,
            net_id: None,
        }
    }
}

/// What changed in an [`Features::apply`] call that other state depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub casemapping_changed: bool,
    /// MONITOR went from unsupported to supported.
    pub monitor_enabled: bool,
}

impl Features {
    pub fn casemap(&self, name: &str) -> String {
        self.casemapping.apply(name)
    }

    pub fn is_channel(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(c))
    }

    /// Apply `KEY[=VALUE]` tokens of one ISUPPORT reply.
    pub fn apply<S: AsRef<str>>(&mut self, tokens: &[S]) -> Applied {
        let mut applied = Applied::default();
        for token in tokens {
            let token = token.as_ref();
            if matches!(token, "" | "-" | "=" | "-=") {
                continue;
            }
            let (add, token) = match token.strip_prefix('-') {
                Some(token) => (false, token),
                None => (true, token),
            };
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            let key = key.to_ascii_uppercase();

            if !add {
                // TODO: restore defaults for negated keys instead of ignoring them.
                tracing::debug!(key = %key, "ISUPPORT negation not supported, ignoring");
                continue;
            }

            match key.as_str() {
                "BOUNCER_NETID" => self.net_id = Some(value.to_string()),
                "CASEMAPPING" => {
                    let casemapping = Casemapping::from_isupport(value);
                    if casemapping != self.casemapping {
                        self.casemapping = casemapping;
                        applied.casemapping_changed = true;
                    }
                }
                "CHANMODES" => {
                    for (slot, class) in self.chanmodes.iter_mut().zip(value.split(',')) {
                        *slot = class.to_string();
                    }
                }
                "CHANTYPES" => self.chantypes = value.to_string(),
                "CHATHISTORY" => {
                    if let Ok(limit) = value.parse() {
                        self.history_limit = limit;
                    }
                }
                "LINELEN" => match value.parse() {
                    Ok(0) | Err(_) => {}
                    Ok(linelen) => self.linelen = linelen,
                },
                "MONITOR" => {
                    if value.parse::<i64>().is_ok_and(|n| n > 0) && !self.monitor {
                        self.monitor = true;
                        applied.monitor_enabled = true;
                    }
                }
                "PREFIX" => self.apply_prefix(value),
                _ => {}
            }
        }
        applied
    }

    fn apply_prefix(&mut self, value: &str) {
        if value.is_empty() {
            self.prefix_modes.clear();
            self.prefix_symbols.clear();
            return;
        }
        if value.len() % 2 != 0 || !value.is_ascii() {
            tracing::warn!(value, "ignoring malformed PREFIX");
            return;
        }
        let n = value.len() / 2 - 1;
        let bytes = value.as_bytes();
        if bytes[0] != b'(' || bytes[n + 1] != b')' {
            tracing::warn!(value, "ignoring malformed PREFIX");
            return;
        }
        self.prefix_modes = value[1..n + 1].to_string();
        self.prefix_symbols = value[n + 2..].to_string();
    }
}
