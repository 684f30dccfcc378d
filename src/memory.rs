//! Reading argument data out of the target's address space
//!
//! Topic names arrive as raw pointers to NUL-terminated buffers. Nothing
//! guarantees the pointer is valid, so every read goes through
//! [`TargetMemory`] and is bounded by a maximum length.

use std::collections::BTreeMap;
use std::sync::RwLock;

use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::unistd::Pid;

use crate::error::CaptureError;

/// Read access to the target's memory
pub trait TargetMemory: Send + Sync {
    /// Read up to `len` bytes starting at `addr`. Short reads are allowed.
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, CaptureError>;
}

/// Read a NUL-terminated string of at most `max_len` bytes
///
/// Invalid UTF-8 is replaced lossily. A missing terminator within `max_len`
/// truncates the string instead of failing.
pub fn read_c_string(
    mem: &dyn TargetMemory,
    addr: u64,
    max_len: usize,
) -> Result<String, CaptureError> {
    if addr == 0 {
        return Err(CaptureError::NullPointer);
    }

    let buf = mem.read(addr, max_len)?;
    if buf.is_empty() {
        return Err(CaptureError::Empty(addr));
    }

    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Memory of a live process, read with `process_vm_readv`
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    pid: Pid,
}

impl ProcessMemory {
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// The process this probe runs in
    pub fn current() -> Self {
        Self {
            pid: nix::unistd::getpid(),
        }
    }
}

impl TargetMemory for ProcessMemory {
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, CaptureError> {
        use std::io::IoSliceMut;

        let mut buf = vec![0u8; len];
        let mut local_iov = [IoSliceMut::new(&mut buf)];
        let remote_iov = [RemoteIoVec {
            base: addr as usize,
            len,
        }];

        let bytes_read = process_vm_readv(self.pid, &mut local_iov, &remote_iov).map_err(
            |errno| CaptureError::Unreadable {
                addr,
                reason: errno.desc().to_string(),
            },
        )?;

        buf.truncate(bytes_read);
        Ok(buf)
    }
}

/// Memory regions captured ahead of time, keyed by start address
///
/// Regions never overlap: a write replaces exactly the bytes it covers and
/// leaves the rest of older regions in place, like a store into the
/// target's memory would.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

fn region_end(start: u64, bytes: &[u8]) -> u64 {
    start.saturating_add(bytes.len() as u64)
}

impl SnapshotMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` at `addr`, overwriting whatever was mapped there
    pub fn insert(&mut self, addr: u64, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let end = region_end(addr, &bytes);

        let overlapping: Vec<u64> = self
            .regions
            .range(..end)
            .filter(|(&start, old)| region_end(start, old) > addr)
            .map(|(&start, _)| start)
            .collect();

        for start in overlapping {
            let Some(old) = self.regions.remove(&start) else {
                continue;
            };
            if start < addr {
                self.regions.insert(start, old[..(addr - start) as usize].to_vec());
            }
            if region_end(start, &old) > end {
                self.regions.insert(end, old[(end - start) as usize..].to_vec());
            }
        }

        self.regions.insert(addr, bytes);
    }

    /// Write `text` plus a NUL terminator at `addr`
    pub fn insert_c_string(&mut self, addr: u64, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.insert(addr, bytes);
    }

    /// Number of disjoint regions currently mapped
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The region covering `addr` and the offset of `addr` inside it
    fn locate(&self, addr: u64) -> Option<(&[u8], usize)> {
        let (&start, bytes) = self.regions.range(..=addr).next_back()?;
        let offset = usize::try_from(addr - start).ok()?;
        (offset < bytes.len()).then_some((bytes.as_slice(), offset))
    }
}

impl TargetMemory for SnapshotMemory {
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, CaptureError> {
        let (bytes, offset) = self.locate(addr).ok_or_else(|| CaptureError::Unreadable {
            addr,
            reason: "address not mapped".to_string(),
        })?;

        let mut out = Vec::with_capacity(len.min(bytes.len() - offset));
        let mut chunk = &bytes[offset..];
        loop {
            let take = chunk.len().min(len - out.len());
            out.extend_from_slice(&chunk[..take]);
            if out.len() == len {
                break;
            }
            // Continue into a region that starts right where this one ends
            let next = addr.saturating_add(out.len() as u64);
            match self.regions.get(&next) {
                Some(region) if next > addr => chunk = region.as_slice(),
                _ => break,
            }
        }

        Ok(out)
    }
}

/// Snapshot memory that is rewritten while the session runs
///
/// Replay writes each call's memory contents just before firing it; the
/// recorders read through the shared lock.
impl TargetMemory for RwLock<SnapshotMemory> {
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, CaptureError> {
        let snapshot = RwLock::read(self).unwrap_or_else(|e| e.into_inner());
        snapshot.read(addr, len)
    }
}
