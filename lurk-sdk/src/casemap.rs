//! Server-declared case folding for nicknames and channel names.

/// How the server compares names, from ISUPPORT `CASEMAPPING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Casemapping {
    /// Only `A-Z` fold to `a-z`.
    Ascii,
    /// `A-Z` plus `[]\~` folding to `{}|^`.
    #[default]
    Rfc1459,
}

impl Casemapping {
    /// Map a `CASEMAPPING` value; anything but `ascii` is treated as rfc1459.
    pub fn from_isupport(value: &str) -> Self {
        match value {
            "ascii" => Casemapping::Ascii,
            _ => Casemapping::Rfc1459,
        }
    }

    /// Canonical map key for `name`.
    pub fn apply(self, name: &str) -> String {
        match self {
            Casemapping::Ascii => name.to_ascii_lowercase(),
            Casemapping::Rfc1459 => name
                .chars()
                .map(|c| match c {
                    '[' => '{',
                    ']' => '}',
                    '\\' => '|',
                    '~' => '^',
                    c => c.to_ascii_lowercase(),
                })
                .collect(),
        }
    }
}
