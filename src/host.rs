//! Interface to the dynamic instrumentation host
//!
//! The host engine (process launch, routine enumeration, symbol undecoration,
//! trampolines) lives outside this crate. The probe only sees enumerated
//! routines and asks the host to observe some of them through
//! [`InstrumentationHost::attach`]. [`AttachmentTable`] is an in-process host
//! that records those requests and dispatches firings back to recorders; the
//! replay front end and the tests drive the whole pipeline through it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Raw value found in an argument slot at call time (pointer-sized)
pub type ArgValue = u64;

/// Highest number of argument slots a host delivers to one observation
pub const MAX_ARG_SLOTS: usize = 16;

/// Where an observation fires relative to the routine body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationPoint {
    Before,
    After,
}

/// A routine offered by the host during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    /// Entry address, used by the host to identify the routine
    pub address: u64,
    /// Undecorated signature, e.g. `Foo::write(Message const&)`
    pub signature: String,
}

impl Routine {
    pub fn new(address: u64, signature: impl Into<String>) -> Self {
        Self {
            address,
            signature: signature.into(),
        }
    }
}

/// A loaded module (image) and the routines the host enumerated in it
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub name: String,
    routines: Vec<Routine>,
}

impl Image {
    pub fn new(name: impl Into<String>, routines: Vec<Routine>) -> Self {
        Self {
            name: name.into(),
            routines,
        }
    }

    /// Routines in enumeration order
    pub fn routines(&self) -> &[Routine] {
        &self.routines
    }
}

/// Non-owning handle to a recorder held by the report collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecorderId(pub usize);

/// "Observe this routine at this point and hand these slots to that recorder"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub address: u64,
    pub point: ObservationPoint,
    pub recorder: RecorderId,
    pub slots: Vec<usize>,
}

/// The part of the host engine the classifier talks to
pub trait InstrumentationHost {
    /// Whether routines of `image` may be instrumented at all
    fn accept_image(&self, _image: &Image) -> Result<(), HostError> {
        Ok(())
    }

    /// Register an observation point; an error means the routine stays
    /// uninstrumented.
    fn attach(&mut self, request: AttachRequest) -> Result<(), HostError>;
}

/// One registered observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub point: ObservationPoint,
    pub recorder: RecorderId,
    pub slots: Vec<usize>,
}

impl Observation {
    /// Pick the requested slots out of the raw argument registers.
    ///
    /// Slots the caller did not supply read as 0.
    pub fn select(&self, raw_args: &[ArgValue]) -> Vec<ArgValue> {
        self.slots
            .iter()
            .map(|&slot| raw_args.get(slot).copied().unwrap_or(0))
            .collect()
    }
}

/// In-process host: keeps attach requests per routine address
#[derive(Debug, Default)]
pub struct AttachmentTable {
    observations: HashMap<u64, Vec<Observation>>,
    unpatchable: HashSet<u64>,
    rejected_images: HashSet<String>,
}

impl AttachmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse future attach requests for `address`, the way a real host
    /// refuses routines it cannot relocate.
    pub fn mark_unpatchable(&mut self, address: u64) {
        self.unpatchable.insert(address);
    }

    /// Refuse every routine of the image called `name`
    pub fn reject_image(&mut self, name: impl Into<String>) {
        self.rejected_images.insert(name.into());
    }

    /// Observations registered for `address` at `point`, in attach order
    pub fn observations(
        &self,
        address: u64,
        point: ObservationPoint,
    ) -> impl Iterator<Item = &Observation> {
        self.observations
            .get(&address)
            .into_iter()
            .flatten()
            .filter(move |obs| obs.point == point)
    }

    /// Whether any observation is registered for `address`
    pub fn is_instrumented(&self, address: u64) -> bool {
        self.observations
            .get(&address)
            .is_some_and(|list| !list.is_empty())
    }

    /// Total number of registered observations
    pub fn len(&self) -> usize {
        self.observations.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstrumentationHost for AttachmentTable {
    fn accept_image(&self, image: &Image) -> Result<(), HostError> {
        if self.rejected_images.contains(&image.name) {
            return Err(HostError::ImageRejected(image.name.clone()));
        }
        Ok(())
    }

    fn attach(&mut self, request: AttachRequest) -> Result<(), HostError> {
        if self.unpatchable.contains(&request.address) {
            return Err(HostError::NotPatchable {
                address: request.address,
            });
        }
        if let Some(&slot) = request.slots.iter().find(|&&s| s >= MAX_ARG_SLOTS) {
            return Err(HostError::SlotOutOfRange {
                slot,
                max: MAX_ARG_SLOTS - 1,
            });
        }

        self.observations
            .entry(request.address)
            .or_default()
            .push(Observation {
                point: request.point,
                recorder: request.recorder,
                slots: request.slots,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(address: u64, recorder: usize, slots: Vec<usize>) -> AttachRequest {
        AttachRequest {
            address,
            point: ObservationPoint::Before,
            recorder: RecorderId(recorder),
            slots,
        }
    }

    #[test]
    fn test_attach_and_lookup() {
        let mut table = AttachmentTable::new();
        table.attach(request(0x1000, 0, vec![])).unwrap();
        table.attach(request(0x1000, 1, vec![0, 1])).unwrap();

        let found: Vec<_> = table
            .observations(0x1000, ObservationPoint::Before)
            .map(|o| o.recorder)
            .collect();
        assert_eq!(found, vec![RecorderId(0), RecorderId(1)]);
        assert_eq!(table.len(), 2);
        assert!(table.is_instrumented(0x1000));
        assert!(!table.is_instrumented(0x2000));
    }

    #[test]
    fn test_point_filtering() {
        let mut table = AttachmentTable::new();
        table.attach(request(0x1000, 0, vec![])).unwrap();
        assert_eq!(table.observations(0x1000, ObservationPoint::After).count(), 0);
    }

    #[test]
    fn test_unpatchable_routine_rejected() {
        let mut table = AttachmentTable::new();
        table.mark_unpatchable(0x1000);
        let err = table.attach(request(0x1000, 0, vec![])).unwrap_err();
        assert_eq!(err, HostError::NotPatchable { address: 0x1000 });
        assert!(table.is_empty());
    }

    #[test]
    fn test_rejected_image() {
        let mut table = AttachmentTable::new();
        table.reject_image("libc.so.6");
        assert!(table.accept_image(&Image::new("libc.so.6", vec![])).is_err());
        assert!(table.accept_image(&Image::new("messenger", vec![])).is_ok());
    }

    #[test]
    fn test_slot_out_of_range_rejected() {
        let mut table = AttachmentTable::new();
        let err = table.attach(request(0x1000, 0, vec![MAX_ARG_SLOTS])).unwrap_err();
        assert!(matches!(err, HostError::SlotOutOfRange { .. }));
    }

    #[test]
    fn test_select_slots() {
        let obs = Observation {
            point: ObservationPoint::Before,
            recorder: RecorderId(0),
            slots: vec![0, 1, 2, 3, 4],
        };
        assert_eq!(obs.select(&[10, 20, 30]), vec![10, 20, 30, 0, 0]);

        let none = Observation { slots: vec![], ..obs };
        assert!(none.select(&[10, 20]).is_empty());
    }

    #[test]
    fn test_image_routines_keep_order() {
        let image = Image::new(
            "libOpenDDS_Dcps.so",
            vec![Routine::new(2, "b()"), Routine::new(1, "a()")],
        );
        let sigs: Vec<_> = image.routines().iter().map(|r| r.signature.as_str()).collect();
        assert_eq!(sigs, vec!["b()", "a()"]);
    }
}
