//! Pack/unpack hint objects.
//!
//! An [`Info`] is an opaque keyval bag attached to a pack or unpack call.
//! The engine recognizes `pack_src_kind` and `pack_dst_kind` with values
//! `host` or `device:<id>`; anything else is retained and ignored. Hints
//! let a caller skip the runtime pointer query; they may change routing
//! cost, never output.

use serde::Serialize;

pub const KEY_SRC_KIND: &str = "pack_src_kind";
pub const KEY_DST_KIND: &str = "pack_dst_kind";

/// Where a hint claims a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemHint {
    Host,
    Device(u32),
}

/// An opaque bag of string hints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Info {
    entries: Vec<(String, String)>,
}

impl Info {
    pub fn new() -> Self {
        Info::default()
    }

    /// Append a key/value hint. The last entry for a key wins.
    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn src_hint(&self) -> Option<MemHint> {
        self.get(KEY_SRC_KIND).and_then(parse_hint)
    }

    pub(crate) fn dst_hint(&self) -> Option<MemHint> {
        self.get(KEY_DST_KIND).and_then(parse_hint)
    }
}

fn parse_hint(value: &str) -> Option<MemHint> {
    if value == "host" {
        return Some(MemHint::Host);
    }
    let id = value.strip_prefix("device:")?;
    id.parse().ok().map(MemHint::Device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_keys_parse() {
        let mut info = Info::new();
        info.set(KEY_SRC_KIND, "host");
        info.set(KEY_DST_KIND, "device:1");
        assert_eq!(info.src_hint(), Some(MemHint::Host));
        assert_eq!(info.dst_hint(), Some(MemHint::Device(1)));
    }

    #[test]
    fn unknown_keys_are_retained_and_ignored() {
        let mut info = Info::new();
        info.set("favorite_color", "green");
        assert_eq!(info.get("favorite_color"), Some("green"));
        assert_eq!(info.src_hint(), None);
    }

    #[test]
    fn malformed_values_fall_back_to_runtime_query() {
        let mut info = Info::new();
        info.set(KEY_SRC_KIND, "device:not-a-number");
        assert_eq!(info.src_hint(), None);
    }

    #[test]
    fn last_entry_wins() {
        let mut info = Info::new();
        info.set(KEY_SRC_KIND, "host");
        info.set(KEY_SRC_KIND, "device:0");
        assert_eq!(info.src_hint(), Some(MemHint::Device(0)));
    }
}
