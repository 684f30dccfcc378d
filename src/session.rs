//! One analysis run: classification, dispatch, teardown
//!
//! The session owns the DDS analysis, the in-process host table and the
//! timing accumulator. Images are loaded through `&mut self`, so the report
//! collection only changes while nothing can fire. Firing takes `&self` and
//! can be called from any number of threads. Callers that keep loading
//! images while target threads are running must put the session behind an
//! `RwLock` (write for [`AnalysisSession::load_image`], read for
//! [`AnalysisSession::fire`]).

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::config::ProbeConfig;
use crate::error::RuleError;
use crate::host::{ArgValue, AttachmentTable, Image, ObservationPoint};
use crate::memory::TargetMemory;
use crate::middleware::{DdsMiddleware, Middleware, ReportCollection};
use crate::recorder::{Observable, RecorderContext};
use crate::report::Report;
use crate::rules::RuleTable;
use crate::timing::TimingAccumulator;

#[derive(Debug)]
pub struct AnalysisSession {
    middleware: DdsMiddleware,
    host: AttachmentTable,
    timing: Arc<TimingAccumulator>,
    include_overhead: bool,
}

impl AnalysisSession {
    /// Start a session with the built-in rules
    pub fn new(config: &ProbeConfig, memory: Arc<dyn TargetMemory>) -> Result<Self, RuleError> {
        Ok(Self::with_rules(RuleTable::builtin()?, config, memory))
    }

    pub fn with_rules(rules: RuleTable, config: &ProbeConfig, memory: Arc<dyn TargetMemory>) -> Self {
        let timing = Arc::new(TimingAccumulator::new());
        let ctx = RecorderContext {
            timing: Arc::clone(&timing),
            memory,
            capture: config.capture.clone(),
        };
        Self {
            middleware: DdsMiddleware::new(rules, ctx),
            host: AttachmentTable::new(),
            timing,
            include_overhead: config.report.include_overhead,
        }
    }

    pub fn name(&self) -> &str {
        self.middleware.name()
    }

    /// Host table, e.g. to mark routines the host cannot patch
    pub fn host_mut(&mut self) -> &mut AttachmentTable {
        &mut self.host
    }

    pub fn host(&self) -> &AttachmentTable {
        &self.host
    }

    /// Classify every routine of a newly loaded image
    pub fn load_image(&mut self, image: &Image) -> usize {
        let attached = self.middleware.analyze_image(image, &mut self.host);
        info!(image = %image.name, attached, "image loaded");
        attached
    }

    /// The routine at `address` is executing; run its observers for `point`
    ///
    /// Returns how many recorders were updated. Firings for routines nobody
    /// observes are ignored.
    pub fn fire(&self, address: u64, point: ObservationPoint, raw_args: &[ArgValue]) -> usize {
        let mut updated = 0;
        for obs in self.host.observations(address, point) {
            match self.middleware.records().get(obs.recorder) {
                Some(recorder) => {
                    recorder.update(&obs.select(raw_args));
                    updated += 1;
                }
                None => debug!(recorder = obs.recorder.0, "observation without recorder"),
            }
        }
        if updated == 0 {
            trace!(address = format_args!("{:#x}", address), "firing ignored");
        }
        updated
    }

    /// Recorders registered so far, in discovery order
    pub fn records(&self) -> &ReportCollection {
        self.middleware.records()
    }

    pub fn timing(&self) -> &TimingAccumulator {
        &self.timing
    }

    /// Build the report from everything observed so far
    pub fn finish(&self) -> Report {
        let mut report = Report::new();
        if let Some(section) = self.middleware.report_section() {
            report.add_section(section);
        }
        if self.include_overhead {
            report.set_overhead(self.timing.summary());
        }
        info!(
            recorders = self.records().len(),
            reported = report.record_count(),
            "analysis finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Routine;
    use crate::memory::SnapshotMemory;

    const WRITE_SIG: &str = "OpenDDS::DCPS::DataWriterImpl_T<Messenger::Message>::write(Messenger::Message const&, int)";
    const TOPIC_SIG: &str = "OpenDDS::DCPS::DomainParticipantImpl::create_topic(char const*, char const*, DDS::TopicQos const&, DDS::TopicListener*, unsigned long)";

    fn session(config: &ProbeConfig, memory: SnapshotMemory) -> AnalysisSession {
        let mut s = AnalysisSession::new(config, Arc::new(memory)).unwrap();
        s.load_image(&Image::new(
            "messenger",
            vec![Routine::new(0x10, WRITE_SIG), Routine::new(0x20, TOPIC_SIG)],
        ));
        s
    }

    #[test]
    fn test_fire_dispatches_to_recorder() {
        let s = session(&ProbeConfig::default(), SnapshotMemory::new());
        assert_eq!(s.fire(0x10, ObservationPoint::Before, &[]), 1);
        assert_eq!(s.fire(0x10, ObservationPoint::After, &[]), 0);
        assert_eq!(s.fire(0x99, ObservationPoint::Before, &[]), 0);
        assert_eq!(s.records().iter().next().unwrap().call_count(), 1);
    }

    #[test]
    fn test_fire_selects_topic_slot() {
        let mut mem = SnapshotMemory::new();
        mem.insert_c_string(0x5000, "Movement");
        let s = session(&ProbeConfig::default(), mem);

        s.fire(0x20, ObservationPoint::Before, &[0x1, 0x5000, 0x2, 0x3, 0x4, 0x5]);
        let report = s.finish();
        let record = &report.sections[0].records[0];
        assert_eq!(record.topics, Some(vec!["Movement".to_string()]));
    }

    #[test]
    fn test_finish_without_calls_is_empty() {
        let s = session(&ProbeConfig::default(), SnapshotMemory::new());
        let report = s.finish();
        assert!(report.sections.is_empty());
        assert!(report.overhead.is_none());
        assert_eq!(s.records().len(), 2);
    }

    #[test]
    fn test_overhead_included_when_configured() {
        let mut config = ProbeConfig::default();
        config.report.include_overhead = true;
        let s = session(&config, SnapshotMemory::new());
        s.fire(0x10, ObservationPoint::Before, &[]);
        s.fire(0x10, ObservationPoint::Before, &[]);

        let overhead = s.finish().overhead.unwrap();
        assert_eq!(overhead.samples, 2);
        assert_eq!(s.timing().summary().samples, 2);
    }

    #[test]
    fn test_unpatchable_routine_never_reported() {
        let mut s = AnalysisSession::new(&ProbeConfig::default(), Arc::new(SnapshotMemory::new())).unwrap();
        s.host_mut().mark_unpatchable(0x10);
        s.load_image(&Image::new("messenger", vec![Routine::new(0x10, WRITE_SIG)]));

        assert_eq!(s.fire(0x10, ObservationPoint::Before, &[]), 0);
        assert!(s.records().is_empty());
        assert!(!s.host().is_instrumented(0x10));
        assert!(s.finish().sections.is_empty());
    }
}
