//! Per-routine recorders
//!
//! A recorder is created once when its routine matches a rule and then
//! lives for the rest of the session. It has two roles, split into two
//! traits: [`Observable`] is what the host calls on every invocation, and
//! [`Reportable`] is what the report stage reads at teardown.
//!
//! Both variants start `Unobserved` and move to `Observed` on the first
//! update; they never move back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::config::CaptureConfig;
use crate::error::{CaptureError, RuleError};
use crate::host::ArgValue;
use crate::memory::{read_c_string, TargetMemory};
use crate::report::RecordEntry;
use crate::rules::{MatchRule, RecorderKind, TOPIC_NAME_SLOT};
use crate::timing::TimingAccumulator;

/// Invoked by the host each time the observed routine runs
pub trait Observable {
    /// `args` holds the values of the requested argument slots, in the
    /// order the slots were requested.
    fn update(&self, args: &[ArgValue]);
}

/// Read by the report stage at teardown
pub trait Reportable {
    /// True once at least one call was observed
    fn has_info(&self) -> bool;

    /// The output record, or `None` while nothing was observed
    fn to_record(&self) -> Option<RecordEntry>;
}

/// Whether a recorder has seen its routine run yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Unobserved,
    Observed,
}

impl RecorderState {
    fn from_count(count: u64) -> Self {
        if count > 0 {
            Self::Observed
        } else {
            Self::Unobserved
        }
    }
}

/// Shared services every recorder is built with
#[derive(Clone)]
pub struct RecorderContext {
    pub timing: Arc<TimingAccumulator>,
    pub memory: Arc<dyn TargetMemory>,
    pub capture: CaptureConfig,
}

impl std::fmt::Debug for RecorderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderContext")
            .field("timing", &self.timing)
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}

/// Counts invocations, captures nothing
#[derive(Debug)]
pub struct CallCounter {
    signature: String,
    object: String,
    count: AtomicU64,
    timing: Arc<TimingAccumulator>,
}

impl CallCounter {
    pub fn new(
        signature: impl Into<String>,
        object: impl Into<String>,
        timing: Arc<TimingAccumulator>,
    ) -> Self {
        Self {
            signature: signature.into(),
            object: object.into(),
            count: AtomicU64::new(0),
            timing,
        }
    }

    pub fn call_count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl Observable for CallCounter {
    fn update(&self, _args: &[ArgValue]) {
        self.timing.measure(|| {
            self.count.fetch_add(1, Ordering::AcqRel);
        });
    }
}

impl Reportable for CallCounter {
    fn has_info(&self) -> bool {
        self.call_count() > 0
    }

    fn to_record(&self) -> Option<RecordEntry> {
        let count = self.call_count();
        if count == 0 {
            return None;
        }
        Some(RecordEntry {
            method: self.signature.clone(),
            object: self.object.clone(),
            call_count: count.to_string(),
            topics: None,
        })
    }
}

#[derive(Debug, Default)]
struct TopicState {
    count: u64,
    topics: Vec<String>,
}

/// Counts invocations and captures the topic name of each one
///
/// The count and the topic list are updated under one lock, so the list is
/// always exactly as long as the count.
pub struct TopicRecorder {
    signature: String,
    object: String,
    /// Position of the topic pointer among the delivered values
    topic_index: usize,
    capture: CaptureConfig,
    memory: Arc<dyn TargetMemory>,
    timing: Arc<TimingAccumulator>,
    state: Mutex<TopicState>,
}

impl std::fmt::Debug for TopicRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRecorder")
            .field("signature", &self.signature)
            .field("object", &self.object)
            .field("topic_index", &self.topic_index)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TopicRecorder {
    pub fn new(
        signature: impl Into<String>,
        object: impl Into<String>,
        topic_index: usize,
        ctx: &RecorderContext,
    ) -> Self {
        Self {
            signature: signature.into(),
            object: object.into(),
            topic_index,
            capture: ctx.capture.clone(),
            memory: Arc::clone(&ctx.memory),
            timing: Arc::clone(&ctx.timing),
            state: Mutex::new(TopicState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn call_count(&self) -> u64 {
        self.lock().count
    }

    /// Captured topic names in call order
    pub fn topics(&self) -> Vec<String> {
        self.lock().topics.clone()
    }

    fn capture_topic(&self, args: &[ArgValue]) -> Result<String, CaptureError> {
        let addr = args
            .get(self.topic_index)
            .copied()
            .ok_or(CaptureError::MissingSlot(self.topic_index))?;
        read_c_string(self.memory.as_ref(), addr, self.capture.max_topic_len)
    }
}

impl Observable for TopicRecorder {
    fn update(&self, args: &[ArgValue]) {
        self.timing.measure(|| {
            let topic = self.capture_topic(args).unwrap_or_else(|e| {
                warn!(method = %self.signature, error = %e, "topic name not captured");
                self.capture.sentinel.clone()
            });

            let mut state = self.lock();
            state.count += 1;
            state.topics.push(topic);
        });
    }
}

impl Reportable for TopicRecorder {
    fn has_info(&self) -> bool {
        self.call_count() > 0
    }

    fn to_record(&self) -> Option<RecordEntry> {
        let state = self.lock();
        if state.count == 0 {
            return None;
        }
        Some(RecordEntry {
            method: self.signature.clone(),
            object: self.object.clone(),
            call_count: state.count.to_string(),
            topics: Some(state.topics.clone()),
        })
    }
}

/// Either recorder variant, as stored in the report collection
#[derive(Debug)]
pub enum Recorder {
    CallCount(CallCounter),
    Topic(TopicRecorder),
}

impl Recorder {
    /// Build the recorder a matched rule asks for
    ///
    /// A topic-capture rule that does not deliver the topic-name slot is
    /// rejected rather than downgraded to a plain counter.
    pub fn from_rule(
        rule: &MatchRule,
        signature: &str,
        ctx: &RecorderContext,
    ) -> Result<Self, RuleError> {
        match (rule.kind, rule.topic_index()) {
            (RecorderKind::TopicCapture, Some(index)) => Ok(Self::Topic(TopicRecorder::new(
                signature,
                rule.object.as_str(),
                index,
                ctx,
            ))),
            (RecorderKind::TopicCapture, None) => Err(RuleError::MissingTopicSlot {
                name: rule.name.clone(),
                slot: TOPIC_NAME_SLOT,
            }),
            (RecorderKind::CallCount, _) => Ok(Self::CallCount(CallCounter::new(
                signature,
                rule.object.as_str(),
                Arc::clone(&ctx.timing),
            ))),
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            Self::CallCount(r) => &r.signature,
            Self::Topic(r) => &r.signature,
        }
    }

    pub fn object(&self) -> &str {
        match self {
            Self::CallCount(r) => &r.object,
            Self::Topic(r) => &r.object,
        }
    }

    pub fn call_count(&self) -> u64 {
        match self {
            Self::CallCount(r) => r.call_count(),
            Self::Topic(r) => r.call_count(),
        }
    }

    /// Captured topics, `None` for plain counters
    pub fn topics(&self) -> Option<Vec<String>> {
        match self {
            Self::CallCount(_) => None,
            Self::Topic(r) => Some(r.topics()),
        }
    }

    pub fn captures_arguments(&self) -> bool {
        matches!(self, Self::Topic(_))
    }

    pub fn state(&self) -> RecorderState {
        RecorderState::from_count(self.call_count())
    }
}

impl Observable for Recorder {
    fn update(&self, args: &[ArgValue]) {
        match self {
            Self::CallCount(r) => r.update(args),
            Self::Topic(r) => r.update(args),
        }
    }
}

impl Reportable for Recorder {
    fn has_info(&self) -> bool {
        match self {
            Self::CallCount(r) => r.has_info(),
            Self::Topic(r) => r.has_info(),
        }
    }

    fn to_record(&self) -> Option<RecordEntry> {
        match self {
            Self::CallCount(r) => r.to_record(),
            Self::Topic(r) => r.to_record(),
        }
    }
}
