//! Match rules: which routine signatures get which recorder
//!
//! Rules are data, not branches. The built-in table is embedded from
//! `rules-default.toml` and parsed once per session.
//!
//! # Example TOML
//! ```toml
//! [[rule]]
//! name = "topic-creation"
//! description = "DomainParticipant create_topic"
//! pattern = "::create_topic("
//! object = "OpenDDS::DCPS::DomainParticipantImpl"
//! slots = [0, 1, 2, 3, 4]
//! point = "before"
//! kind = "topic-capture"
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::host::{ObservationPoint, MAX_ARG_SLOTS};

/// Argument slot holding the topic name pointer of `create_topic`
pub const TOPIC_NAME_SLOT: usize = 1;

/// Which recorder variant a rule produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecorderKind {
    /// Count invocations only
    CallCount,
    /// Count invocations and capture the topic name argument
    TopicCapture,
}

/// One signature pattern and what to do when it matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Substring the signature must contain
    pub pattern: String,

    /// Second substring that must also appear, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,

    /// Calling-object label reported for recorders built from this rule
    pub object: String,

    /// Argument slots delivered to the recorder on each call
    #[serde(default)]
    pub slots: Vec<usize>,

    pub point: ObservationPoint,

    pub kind: RecorderKind,
}

impl MatchRule {
    /// Does `signature` satisfy this rule?
    pub fn matches(&self, signature: &str) -> bool {
        signature.contains(&self.pattern)
            && self
                .requires
                .as_deref()
                .map_or(true, |req| signature.contains(req))
    }

    /// Position of the topic-name slot among the delivered values
    pub fn topic_index(&self) -> Option<usize> {
        self.slots.iter().position(|&s| s == TOPIC_NAME_SLOT)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if self.pattern.is_empty() {
            return Err(RuleError::EmptyPattern(self.name.clone()));
        }
        if let Some(&slot) = self.slots.iter().find(|&&s| s >= MAX_ARG_SLOTS) {
            return Err(RuleError::SlotOutOfRange {
                name: self.name.clone(),
                slot,
                max: MAX_ARG_SLOTS - 1,
            });
        }
        if self.kind == RecorderKind::TopicCapture && self.topic_index().is_none() {
            return Err(RuleError::MissingTopicSlot {
                name: self.name.clone(),
                slot: TOPIC_NAME_SLOT,
            });
        }
        Ok(())
    }
}

/// Ordered, immutable set of match rules
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<MatchRule>,
}

impl RuleTable {
    /// The three OpenDDS rules compiled into the binary
    pub fn builtin() -> Result<Self, RuleError> {
        const DEFAULT_TOML: &str = include_str!("../rules-default.toml");
        Self::from_toml_str(DEFAULT_TOML)
    }

    /// Parse and validate a rule table
    pub fn from_toml_str(content: &str) -> Result<Self, RuleError> {
        #[derive(Deserialize)]
        struct RuleFile {
            #[serde(default)]
            rule: Vec<MatchRule>,
        }

        let file: RuleFile = toml::from_str(content)?;

        let mut names = HashSet::new();
        for rule in &file.rule {
            if !names.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateName(rule.name.clone()));
            }
            rule.validate()?;
        }

        Ok(Self { rules: file.rule })
    }

    /// Every rule `signature` satisfies, in table order
    pub fn matching<'a>(&'a self, signature: &'a str) -> impl Iterator<Item = &'a MatchRule> + 'a {
        self.rules.iter().filter(move |rule| rule.matches(signature))
    }

    pub fn get(&self, name: &str) -> Option<&MatchRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRITE_SIG: &str =
        "OpenDDS::DCPS::DataWriterImpl_T<Messenger::Message>::write(Messenger::Message const&, int)";

    #[test]
    fn test_builtin_has_three_rules() {
        let table = RuleTable::builtin().unwrap();
        let names: Vec<_> = table.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["publish-write", "subscribe-take", "topic-creation"]);
    }

    #[test]
    fn test_builtin_topic_rule_shape() {
        let table = RuleTable::builtin().unwrap();
        let rule = table.get("topic-creation").unwrap();
        assert_eq!(rule.slots, vec![0, 1, 2, 3, 4]);
        assert_eq!(rule.kind, RecorderKind::TopicCapture);
        assert_eq!(rule.point, ObservationPoint::Before);
        assert_eq!(rule.object, "OpenDDS::DCPS::DomainParticipantImpl");
        assert_eq!(rule.topic_index(), Some(1));
    }

    #[test]
    fn test_write_requires_writer_impl() {
        let table = RuleTable::builtin().unwrap();
        let rule = table.get("publish-write").unwrap();
        assert!(rule.matches(WRITE_SIG));
        assert!(!rule.matches("std::ostream::write(char const*, long)"));
    }

    #[test]
    fn test_take_next_sample_matches() {
        let table = RuleTable::builtin().unwrap();
        let sig = "OpenDDS::DCPS::DataReaderImpl_T<Messenger::Message>::take_next_sample(Messenger::Message&, DDS::SampleInfo&)";
        let matched: Vec<_> = table.matching(sig).map(|r| r.name.as_str()).collect();
        assert_eq!(matched, vec!["subscribe-take"]);
    }

    #[test]
    fn test_unrelated_signature_matches_nothing() {
        let table = RuleTable::builtin().unwrap();
        assert_eq!(table.matching("main").count(), 0);
        assert_eq!(table.matching("ACE_OS::write(int, void const*, unsigned long)").count(), 0);
    }

    #[test]
    fn test_rules_are_not_exclusive() {
        let table = RuleTable::builtin().unwrap();
        let sig = "DataWriterImpl_T<X>::write(int)::create_topic(char const*)";
        assert_eq!(table.matching(sig).count(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let toml = r#"
            [[rule]]
            name = "a"
            pattern = "x"
            object = "X"
            point = "before"
            kind = "call-count"

            [[rule]]
            name = "a"
            pattern = "y"
            object = "Y"
            point = "after"
            kind = "call-count"
        "#;
        assert!(matches!(
            RuleTable::from_toml_str(toml),
            Err(RuleError::DuplicateName(n)) if n == "a"
        ));
    }

    #[test]
    fn test_topic_rule_without_name_slot_rejected() {
        let toml = r#"
            [[rule]]
            name = "bad-topic"
            pattern = "::create_topic("
            object = "P"
            slots = [0]
            point = "before"
            kind = "topic-capture"
        "#;
        assert!(matches!(
            RuleTable::from_toml_str(toml),
            Err(RuleError::MissingTopicSlot { .. })
        ));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let toml = r#"
            [[rule]]
            name = "empty"
            pattern = ""
            object = "P"
            point = "before"
            kind = "call-count"
        "#;
        assert!(matches!(
            RuleTable::from_toml_str(toml),
            Err(RuleError::EmptyPattern(_))
        ));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            RuleTable::from_toml_str("[[rule]]\nname = "),
            Err(RuleError::Parse(_))
        ));
    }
}
