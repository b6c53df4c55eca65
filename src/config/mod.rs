use crate::error::{AppError, AppResult, AppWrap};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

/// Default delete-deferral grace period, applied when `DeleteAfter` is
/// absent or fails to parse.
pub const DEFAULT_DELETE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigJson {
    #[serde(rename = "Tables")]
    pub tables: BTreeMap<String, Vec<String>>,
    #[serde(rename = "Flush", default)]
    pub flush: u32,
    #[serde(rename = "Verbose", default)]
    pub verbose: u8,
    #[serde(rename = "DeleteAfter", default)]
    pub delete_after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub tables: BTreeMap<String, Vec<String>>,
    pub flush: u32,
    pub verbose: u8,
    pub delete_after: Duration,
}

impl Config {
    /// Parses the config JSON from an already-open reader (the supervisor
    /// hands the resolver a preopened file descriptor rather than a path,
    /// since the path may not be reachable once the resolver has chrooted).
    pub fn parse<R: Read>(mut r: R) -> AppResult<Config> {
        let mut raw = String::new();
        r.read_to_string(&mut raw).wrap("reading config")?;

        let stripped = strip_line_comments(&raw);

        let j: ConfigJson = serde_json::from_str(&stripped)
            .map_err(|e| AppError::msg(format!("bad json in config: {e}")))?;

        let delete_after = j
            .delete_after
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
            .unwrap_or(DEFAULT_DELETE_AFTER);

        let cfg = Config {
            tables: j.tables,
            flush: j.flush,
            verbose: j.verbose,
            delete_after,
        };

        if cfg.verbose > 0 {
            debug!("{cfg:?}");
        }

        Ok(cfg)
    }
}

/// Strips `//`-prefixed line comments before JSON parsing. Not a sound JSON
/// preprocessor -- a string literal containing `//` followed by a newline
/// will be corrupted -- but the grammar this daemon accepts documents and
/// preserves that quirk rather than silently deviating from it.
fn strip_line_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.split_inclusive('\n') {
        let trimmed_end = line.trim_end_matches(['\n', '\r']);
        if let Some(idx) = trimmed_end.find("//") {
            out.push_str(&trimmed_end[..idx]);
            out.push('\n');
        } else {
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_basic_config() {
        let json = r#"{
            "Tables": {"pf_table": ["a.example", "192.0.2.7"]},
            "Flush": 300,
            "Verbose": 1,
            "DeleteAfter": "5m"
        }"#;
        let cfg = Config::parse(Cursor::new(json)).unwrap();
        assert_eq!(cfg.tables["pf_table"], vec!["a.example", "192.0.2.7"]);
        assert_eq!(cfg.flush, 300);
        assert_eq!(cfg.verbose, 1);
        assert_eq!(cfg.delete_after, Duration::from_secs(300));
    }

    #[test]
    fn defaults_delete_after_when_absent() {
        let json = r#"{"Tables": {"t": ["h"]}}"#;
        let cfg = Config::parse(Cursor::new(json)).unwrap();
        assert_eq!(cfg.delete_after, DEFAULT_DELETE_AFTER);
    }

    #[test]
    fn defaults_delete_after_when_unparseable() {
        let json = r#"{"Tables": {"t": ["h"]}, "DeleteAfter": "not-a-duration"}"#;
        let cfg = Config::parse(Cursor::new(json)).unwrap();
        assert_eq!(cfg.delete_after, DEFAULT_DELETE_AFTER);
    }

    #[test]
    fn strips_line_comments_before_parsing() {
        let json = "{\n  // a comment\n  \"Tables\": {\"t\": [\"h\"]}\n}\n";
        let cfg = Config::parse(Cursor::new(json)).unwrap();
        assert_eq!(cfg.tables["t"], vec!["h"]);
    }

    #[test]
    fn rejects_malformed_json() {
        let json = r#"{"Tables": {"x": [bad json"#;
        let err = Config::parse(Cursor::new(json)).unwrap_err();
        assert!(err.to_string().contains("bad json in config"));
    }
}
