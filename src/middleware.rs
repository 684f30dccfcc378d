//! Routine classification for middleware analyses
//!
//! A [`Middleware`] looks at every routine the host enumerates, decides
//! whether it belongs to the middleware's data path, and if so creates a
//! recorder and asks the host to observe the routine. [`DdsMiddleware`]
//! does this for the OpenDDS publish/subscribe calls described by the
//! built-in [`RuleTable`].

use tracing::{debug, warn};

use crate::host::{AttachRequest, Image, InstrumentationHost, RecorderId, Routine};
use crate::recorder::{Recorder, RecorderContext};
use crate::report::{emit_section, ReportSection};
use crate::rules::RuleTable;

/// Append-only store of the recorders created during classification
///
/// The collection is the only owner of its recorders. The host gets
/// [`RecorderId`] handles and looks recorders up through [`Self::get`].
#[derive(Debug, Default)]
pub struct ReportCollection {
    recorders: Vec<Recorder>,
}

impl ReportCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the next pushed recorder will get
    pub fn next_id(&self) -> RecorderId {
        RecorderId(self.recorders.len())
    }

    pub fn push(&mut self, recorder: Recorder) -> RecorderId {
        let id = self.next_id();
        self.recorders.push(recorder);
        id
    }

    pub fn get(&self, id: RecorderId) -> Option<&Recorder> {
        self.recorders.get(id.0)
    }

    /// Recorders in discovery order
    pub fn iter(&self) -> std::slice::Iter<'_, Recorder> {
        self.recorders.iter()
    }

    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }
}

impl<'a> IntoIterator for &'a ReportCollection {
    type Item = &'a Recorder;
    type IntoIter = std::slice::Iter<'a, Recorder>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One middleware-specific analysis
pub trait Middleware {
    /// Label used for this analysis' report section
    fn name(&self) -> &str;

    /// Classify one routine. Returns how many recorders were attached.
    fn analyze_routine(&mut self, routine: &Routine, host: &mut dyn InstrumentationHost) -> usize;

    /// All recorders registered so far
    fn records(&self) -> &ReportCollection;

    /// Classify every routine of a freshly loaded image
    fn analyze_image(&mut self, image: &Image, host: &mut dyn InstrumentationHost) -> usize {
        if let Err(e) = host.accept_image(image) {
            warn!(image = %image.name, error = %e, "skipping image");
            return 0;
        }

        let attached: usize = image
            .routines()
            .iter()
            .map(|routine| self.analyze_routine(routine, &mut *host))
            .sum();
        debug!(image = %image.name, routines = image.routines().len(), attached, "image analyzed");
        attached
    }

    /// This analysis' slice of the report, `None` if nothing was observed
    fn report_section(&self) -> Option<ReportSection> {
        emit_section(self.name(), self.records())
    }
}

/// OpenDDS publish/subscribe analysis
#[derive(Debug)]
pub struct DdsMiddleware {
    rules: RuleTable,
    ctx: RecorderContext,
    output: ReportCollection,
}

impl DdsMiddleware {
    pub const NAME: &'static str = "DDS Middleware";

    pub fn new(rules: RuleTable, ctx: RecorderContext) -> Self {
        Self {
            rules,
            ctx,
            output: ReportCollection::new(),
        }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }
}

impl Middleware for DdsMiddleware {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze_routine(&mut self, routine: &Routine, host: &mut dyn InstrumentationHost) -> usize {
        let mut attached = 0;

        for rule in self.rules.matching(&routine.signature) {
            let recorder = match Recorder::from_rule(rule, &routine.signature, &self.ctx) {
                Ok(recorder) => recorder,
                Err(e) => {
                    warn!(method = %routine.signature, error = %e, "rule cannot build a recorder");
                    continue;
                }
            };

            let id = self.output.next_id();
            let request = AttachRequest {
                address: routine.address,
                point: rule.point,
                recorder: id,
                slots: rule.slots.clone(),
            };

            if let Err(e) = host.attach(request) {
                warn!(
                    rule = %rule.name,
                    method = %routine.signature,
                    error = %e,
                    "host refused instrumentation, routine left unrecorded"
                );
                continue;
            }

            self.output.push(recorder);
            attached += 1;

            debug!(
                rule = %rule.name,
                object = %rule.object,
                address = format_args!("{:#x}", routine.address),
                "instrumented {}",
                routine.signature
            );
        }

        attached
    }

    fn records(&self) -> &ReportCollection {
        &self.output
    }
}
