//! ddsprobe - DDS publish/subscribe call analysis for instrumented processes
//!
//! This library is the analysis core of a dynamic-instrumentation plugin.
//! It classifies the routines of a target against OpenDDS call patterns,
//! attaches counting recorders to the matches, captures topic names passed
//! to `create_topic`, and produces a JSON report when the target exits.
//!
//! ```
//! use std::sync::Arc;
//! use ddsprobe::{AnalysisSession, Image, ObservationPoint, ProbeConfig, Routine, SnapshotMemory};
//!
//! let mut session = AnalysisSession::new(&ProbeConfig::default(), Arc::new(SnapshotMemory::new()))?;
//! session.load_image(&Image::new("messenger", vec![Routine::new(
//!     0x401a20,
//!     "OpenDDS::DCPS::DataWriterImpl_T<Messenger::Message>::write(Messenger::Message const&, int)",
//! )]));
//!
//! session.fire(0x401a20, ObservationPoint::Before, &[]);
//! let report = session.finish();
//! assert_eq!(report.sections[0].records[0].call_count, "1");
//! # Ok::<(), ddsprobe::error::RuleError>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod memory;
pub mod middleware;
pub mod recorder;
pub mod replay;
pub mod report;
pub mod rules;
pub mod session;
pub mod timing;

pub use config::ProbeConfig;
pub use host::{Image, InstrumentationHost, ObservationPoint, Routine};
pub use memory::{ProcessMemory, SnapshotMemory, TargetMemory};
pub use middleware::{DdsMiddleware, Middleware, ReportCollection};
pub use recorder::{Observable, Recorder, Reportable};
pub use report::{RecordEntry, Report};
pub use session::AnalysisSession;
