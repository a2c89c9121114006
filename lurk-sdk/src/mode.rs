//! Channel MODE strings, NAMES entries and membership power levels.

use crate::error::SessionError;
use crate::irc::Prefix;

/// One `+x`/`-x` item of a MODE command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub enable: bool,
    pub mode: char,
    pub param: Option<String>,
}

/// Split a channel mode string into changes, pairing parameters with the
/// letters that consume them.
///
/// Membership modes and class A/B modes always take a parameter, class C
/// modes only when set, class D and unknown letters never.
pub fn parse_channel_mode(
    channel: &str,
    modes: &str,
    params: &[String],
    chanmodes: &[String; 4],
    prefix_modes: &str,
) -> Result<Vec<ModeChange>, SessionError> {
    let mut params = params.iter();
    let mut enable = true;
    let mut changes = Vec::new();
    for mode in modes.chars() {
        match mode {
            '+' => enable = true,
            '-' => enable = false,
            _ => {
                let takes_param = prefix_modes.contains(mode)
                    || chanmodes[0].contains(mode)
                    || chanmodes[1].contains(mode)
                    || (enable && chanmodes[2].contains(mode));
                let param = if takes_param {
                    let param = params.next().ok_or_else(|| SessionError::MissingModeArgument {
                        channel: channel.to_string(),
                        mode,
                    })?;
                    Some(param.clone())
                } else {
                    None
                };
                changes.push(ModeChange {
                    enable,
                    mode,
                    param,
                });
            }
        }
    }
    Ok(changes)
}

/// One member of a `353` NAMES reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub power_level: String,
    pub name: Prefix,
}

/// Parse the space separated names of a NAMES reply. Leading membership
/// symbols (several with multi-prefix) become the power level; the rest may
/// be a full `nick!user@host` with userhost-in-names.
pub fn parse_name_reply(names: &str, prefix_symbols: &str) -> Vec<NameEntry> {
    names
        .split_whitespace()
        .filter_map(|word| {
            let split = word
                .char_indices()
                .find(|(_, c)| !prefix_symbols.contains(*c))
                .map_or(word.len(), |(i, _)| i);
            let (symbols, name) = word.split_at(split);
            let name = Prefix::parse(name)?;
            Some(NameEntry {
                power_level: sort_power_level(symbols, prefix_symbols),
                name,
            })
        })
        .collect()
}

/// Add `symbol` to a power level, keeping symbols in rank order.
pub fn add_symbol(power_level: &str, symbol: char, prefix_symbols: &str) -> String {
    if power_level.contains(symbol) {
        return power_level.to_string();
    }
    let mut level = power_level.to_string();
    level.push(symbol);
    sort_power_level(&level, prefix_symbols)
}

pub fn remove_symbol(power_level: &str, symbol: char) -> String {
    power_level.chars().filter(|&c| c != symbol).collect()
}

fn sort_power_level(level: &str, prefix_symbols: &str) -> String {
    let mut symbols: Vec<char> = level.chars().collect();
    symbols.sort_by_key(|s| prefix_symbols.chars().position(|p| p == *s).unwrap_or(usize::MAX));
    symbols.into_iter().collect()
}
