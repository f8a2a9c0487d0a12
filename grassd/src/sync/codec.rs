//! Reversible substitution of characters the dictionary store refuses in keys.
//!
//! The table is applied in order for both directions. A name that already
//! contains one of the tokens literally (say `&123`) does not survive a round
//! trip: decoding turns the token into its symbol. Callers never get to see
//! raw encoded keys, so this only bites for such names.

const SUBSTITUTIONS: [(char, &str); 5] = [
    ('.', "&123"),
    ('$', "&456"),
    ('#', "&789"),
    ('[', "&234"),
    (']', "&567"),
];

/// Stands in for `/` when a whole path has to fit in a single key.
pub const SEPARATOR_TOKEN: &str = "&345";

pub fn encode(name: &str) -> String {
    let mut out = name.to_string();
    for (symbol, token) in SUBSTITUTIONS {
        out = out.replace(symbol, token);
    }
    out
}

pub fn decode(name: &str) -> String {
    let mut out = name.to_string();
    for (symbol, token) in SUBSTITUTIONS {
        out = out.replace(token, &symbol.to_string());
    }
    out
}

/// Non-empty `/`-separated segments of a cloud path, each encoded.
pub fn encode_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(encode)
        .collect()
}

/// Encodes every segment and keeps the separators, for use as a key path.
pub fn encode_path(path: &str) -> String {
    encode_segments(path).join("/")
}

/// Encodes the whole path into one key with no separators left in it.
pub fn encode_flat(path: &str) -> String {
    encode_segments(path).join(SEPARATOR_TOKEN)
}

pub fn decode_flat(key: &str) -> String {
    key.split(SEPARATOR_TOKEN)
        .map(decode)
        .collect::<Vec<_>>()
        .join("/")
}
