/** ------------------------------------------------------------
 * Reader/writer for `KEY=value` profile files
 * ------------------------------------------------------------- */
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/**
 * Ordered key/value store as found in device profile files.
 *
 * Blank lines and lines starting with `#` or `!` are ignored. Keys are
 * separated from values by the first `=` or `:`. Surrounding
 * whitespace is trimmed from both.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(['=', ':']) {
                Some(pos) => (&line[..pos], &line[pos + 1..]),
                None => (line, ""),
            };
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /**
     * Parse the value under `key`, falling back to `default` when the
     * key is absent or the value does not parse.
     */
    pub fn parse_or<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + fmt::Display,
    {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(key, value = raw, %default, "unparsable profile value, using default");
                default
            }),
        }
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_and_separators() {
        let props = Properties::parse(
            "# device profile\n\
             ! legacy comment\n\
             CARRIER = AT&T\n\
             BURST_TH:2.5\n\
             \n\
             EMPTY\n",
        );
        assert_eq!(props.len(), 3);
        assert_eq!(props.get("CARRIER"), Some("AT&T"));
        assert_eq!(props.get("BURST_TH"), Some("2.5"));
        assert_eq!(props.get("EMPTY"), Some(""));
    }

    #[test]
    fn bad_values_fall_back_to_default() {
        let props = Properties::parse("BURST_TH=fast\nLONG_BURST_TH=7\n");
        assert_eq!(props.parse_or("BURST_TH", 1.5), 1.5);
        assert_eq!(props.parse_or("LONG_BURST_TH", 5.0), 7.0);
        assert_eq!(props.parse_or("MISSING", 3u32), 3);
    }

    #[test]
    fn display_writes_parseable_text() {
        let mut props = Properties::new();
        props.set("A", 1.25);
        props.set("B", "x=y");
        let reparsed = Properties::parse(&props.to_string());
        assert_eq!(reparsed, props);
    }
}
