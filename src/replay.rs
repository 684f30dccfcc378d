//! Offline front end: symbol lists and recorded call events
//!
//! A symbol list is the output of `nm -C` for the target:
//!
//! ```text
//! 0000000000401a20 T OpenDDS::DCPS::DataWriterImpl_T<Messenger::Message>::write(Messenger::Message const&, int)
//! ```
//!
//! An event log holds one JSON object per line. `strings` maps addresses to
//! the text found there when the call happened; it is written into the
//! replayed memory just before that call fires, so topic pointers resolve
//! to what the target held at the time:
//!
//! ```text
//! {"address": "0x401a20", "point": "before", "args": []}
//! {"address": "0x401b00", "point": "before", "args": ["0x1", "0x7000"], "strings": {"0x7000": "Movement"}}
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::host::{ArgValue, Image, ObservationPoint, Routine};
use crate::memory::{SnapshotMemory, TargetMemory};
use crate::report::Report;
use crate::rules::RuleTable;
use crate::session::AnalysisSession;

/// Parse `nm -C` output into routines
///
/// Only text symbols (`T`, `t`, `W`, `w`) are kept; undefined symbols and
/// lines that do not parse are skipped.
pub fn parse_symbols(content: &str) -> Vec<Routine> {
    content.lines().filter_map(parse_symbol_line).collect()
}

fn parse_symbol_line(line: &str) -> Option<Routine> {
    let line = line.trim();
    let (addr, rest) = line.split_once(char::is_whitespace)?;
    let (kind, signature) = rest.trim_start().split_once(char::is_whitespace)?;

    if !matches!(kind, "T" | "t" | "W" | "w") {
        return None;
    }
    let address = u64::from_str_radix(addr, 16).ok()?;
    let signature = signature.trim();
    if signature.is_empty() {
        return None;
    }

    Some(Routine::new(address, signature))
}

/// A numeric value written either as a JSON number or a (hex) string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Word {
    Number(u64),
    Text(String),
}

impl Word {
    fn value(&self) -> Result<u64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => parse_address(s),
        }
    }
}

fn parse_address(text: &str) -> Result<u64> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("Invalid address: {:?}", text))
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    address: Word,
    #[serde(default = "default_point")]
    point: ObservationPoint,
    #[serde(default)]
    args: Vec<Word>,
    #[serde(default)]
    strings: BTreeMap<String, String>,
}

fn default_point() -> ObservationPoint {
    ObservationPoint::Before
}

/// One recorded routine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub address: u64,
    pub point: ObservationPoint,
    pub args: Vec<ArgValue>,
    /// Memory contents visible at call time
    pub strings: Vec<(u64, String)>,
}

/// Parse a JSON-lines event log; blank lines and `#` comments are skipped
pub fn parse_events(content: &str) -> Result<Vec<CallEvent>> {
    let mut events = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = index + 1;

        let raw: RawEvent = serde_json::from_str(line)
            .with_context(|| format!("Invalid event on line {}", lineno))?;

        let address = raw.address.value().with_context(|| format!("line {}", lineno))?;
        let args = raw
            .args
            .iter()
            .map(Word::value)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("line {}", lineno))?;
        let strings = raw
            .strings
            .iter()
            .map(|(addr, text)| -> Result<(u64, String)> { Ok((parse_address(addr)?, text.clone())) })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("line {}", lineno))?;

        events.push(CallEvent {
            address,
            point: raw.point,
            args,
            strings,
        });
    }

    Ok(events)
}

/// A routine and the rule it matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    pub address: u64,
    pub signature: String,
    pub rule: String,
    pub object: String,
}

/// Classify routines without recording anything
pub fn scan(rules: &RuleTable, routines: &[Routine]) -> Vec<ScanMatch> {
    routines
        .iter()
        .flat_map(|routine| {
            rules.matching(&routine.signature).map(move |rule| ScanMatch {
                address: routine.address,
                signature: routine.signature.clone(),
                rule: rule.name.clone(),
                object: rule.object.clone(),
            })
        })
        .collect()
}

/// Classify `routines` as one image, replay `events` against it, and
/// return the teardown report
pub fn run_replay(
    image_name: &str,
    routines: Vec<Routine>,
    events: &[CallEvent],
    config: &ProbeConfig,
) -> Result<Report> {
    if routines.is_empty() {
        bail!("Symbol list contains no text symbols");
    }

    let memory = Arc::new(RwLock::new(SnapshotMemory::new()));
    let mut session = AnalysisSession::new(config, Arc::clone(&memory) as Arc<dyn TargetMemory>)
        .context("Failed to load built-in match rules")?;
    session.load_image(&Image::new(image_name, routines));

    let mut fired = 0;
    for event in events {
        // The call sees memory as it was when the call happened
        if !event.strings.is_empty() {
            let mut snapshot = memory.write().unwrap_or_else(|e| e.into_inner());
            for (addr, text) in &event.strings {
                snapshot.insert_c_string(*addr, text);
            }
        }
        fired += session.fire(event.address, event.point, &event.args);
    }
    debug!(fired, events = events.len(), "replay finished");

    Ok(session.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOLS: &str = "\
0000000000401a20 T OpenDDS::DCPS::DataWriterImpl_T<Messenger::Message>::write(Messenger::Message const&, int)
0000000000401b00 W OpenDDS::DCPS::DomainParticipantImpl::create_topic(char const*, char const*, DDS::TopicQos const&, DDS::TopicListener*, unsigned long)
                 U ACE_OS::write(int, void const*, unsigned long)
0000000000401c00 T main
0000000000601000 B some_global
garbage
";

    #[test]
    fn test_parse_symbols() {
        let routines = parse_symbols(SYMBOLS);
        assert_eq!(routines.len(), 3);
        assert_eq!(routines[0].address, 0x401a20);
        assert!(routines[0].signature.ends_with("write(Messenger::Message const&, int)"));
        assert_eq!(routines[2].signature, "main");
    }

    #[test]
    fn test_parse_events() {
        let log = r#"
# publisher
{"address": "0x401a20", "args": []}
{"address": 4201216, "point": "before", "args": ["0x1", "0x7000", 3], "strings": {"0x7000": "Movement"}}
"#;
        let events = parse_events(log).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].point, ObservationPoint::Before);
        assert_eq!(events[1].address, 0x401b00);
        assert_eq!(events[1].args, vec![1, 0x7000, 3]);
        assert_eq!(events[1].strings, vec![(0x7000, "Movement".to_string())]);
    }

    #[test]
    fn test_parse_events_reports_line() {
        let err = parse_events("{\"address\": \"0x1\"}\n{\"address\": \"zz\"}\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_scan() {
        let rules = RuleTable::builtin().unwrap();
        let matches = scan(&rules, &parse_symbols(SYMBOLS));
        let names: Vec<_> = matches.iter().map(|m| m.rule.as_str()).collect();
        assert_eq!(names, vec!["publish-write", "topic-creation"]);
    }

    #[test]
    fn test_run_replay() {
        let events = parse_events(
            r#"{"address": "0x401b00", "args": ["0x0", "0x7000", "0x0", "0x0", "0x0"], "strings": {"0x7000": "Movement"}}
{"address": "0x401b00", "args": ["0x0", "0x7100", "0x0", "0x0", "0x0"], "strings": {"0x7100": "Tracking"}}
{"address": "0x401c00", "args": []}"#,
        )
        .unwrap();

        let report = run_replay("messenger", parse_symbols(SYMBOLS), &events, &ProbeConfig::default()).unwrap();
        assert_eq!(report.record_count(), 1);
        let record = &report.sections[0].records[0];
        assert_eq!(record.call_count, "2");
        assert_eq!(
            record.topics,
            Some(vec!["Movement".to_string(), "Tracking".to_string()])
        );
    }

    #[test]
    fn test_run_replay_reused_buffer_keeps_call_time_topics() {
        let events = parse_events(
            r#"{"address": "0x401b00", "args": ["0x0", "0x7000", "0x0", "0x0", "0x0"], "strings": {"0x7000": "Movement"}}
{"address": "0x401b00", "args": ["0x0", "0x7000", "0x0", "0x0", "0x0"], "strings": {"0x7000": "Tracking"}}
{"address": "0x401b00", "args": ["0x0", "0x7000", "0x0", "0x0", "0x0"]}"#,
        )
        .unwrap();

        let report = run_replay("messenger", parse_symbols(SYMBOLS), &events, &ProbeConfig::default()).unwrap();
        let record = &report.sections[0].records[0];
        assert_eq!(record.call_count, "3");
        // The third call wrote nothing, so it still sees the last contents
        assert_eq!(
            record.topics,
            Some(vec![
                "Movement".to_string(),
                "Tracking".to_string(),
                "Tracking".to_string()
            ])
        );
    }

    #[test]
    fn test_run_replay_string_written_after_call_is_not_seen() {
        let events = parse_events(
            r#"{"address": "0x401b00", "args": ["0x0", "0x7000", "0x0", "0x0", "0x0"]}
{"address": "0x401a20", "args": [], "strings": {"0x7000": "Movement"}}"#,
        )
        .unwrap();

        let report = run_replay("messenger", parse_symbols(SYMBOLS), &events, &ProbeConfig::default()).unwrap();
        let topic = report.sections[0]
            .records
            .iter()
            .find(|r| r.topics.is_some())
            .unwrap();
        assert_eq!(topic.topics, Some(vec!["<unreadable>".to_string()]));
    }

    #[test]
    fn test_run_replay_requires_symbols() {
        assert!(run_replay("x", vec![], &[], &ProbeConfig::default()).is_err());
    }
}
