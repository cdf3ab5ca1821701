//! Per-worker configuration and the file handle the adjuster operates on
//! (§6: "Consumed from the engine").

use std::sync::{atomic::{AtomicU8, Ordering}, Arc};

use crate::{device::DeviceDescriptor, validator::WorkerRange};

/// Direction of a single I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
    Trim,
    Sync,
}

/// Per-direction minimum/maximum block size, in bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockSizeRange {
    pub min: u64,
    pub max: u64,
}

/// Whether data verification is enabled for this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Disabled,
    Enabled,
}

/// The engine's run state, as relevant to the adjuster (§4.4 step 4 reads
/// this to redirect reads during a verification replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Running = 0,
    Verifying = 1,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Verifying,
            _ => RunState::Running,
        }
    }
}

/// The full configuration surface the engine must populate for a worker
/// before calling `init` (§10, Configuration).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub read_bs: BlockSizeRange,
    pub write_bs: BlockSizeRange,
    pub verify: VerifyMode,
    /// Workload issues operations at random offsets rather than
    /// sequentially.
    pub randomize: bool,
    /// Skip the write-pointer bounds check on reads entirely.
    pub read_beyond_wp: bool,
    /// Whether the worker's writes bypass the page cache (`O_DIRECT`).
    pub direct_io: bool,
    /// Whether this worker ever issues writes (used by the direct-I/O
    /// check and by `file_reset`'s `all` policy).
    pub writes: bool,
}

/// A worker's open file: the shared device it targets plus the worker's own
/// validated range and configuration. Several workers may share one
/// `device` (see `crate::registry`).
pub struct ZbdFile {
    pub device: Arc<DeviceDescriptor>,
    pub range: WorkerRange,
    pub config: WorkerConfig,
    runstate: AtomicU8,
}

impl ZbdFile {
    pub fn new(
        device: Arc<DeviceDescriptor>,
        range: WorkerRange,
        config: WorkerConfig,
    ) -> Self {
        Self {
            device,
            range,
            config,
            runstate: AtomicU8::new(RunState::Running as u8),
        }
    }

    pub fn runstate(&self) -> RunState {
        RunState::from_u8(self.runstate.load(Ordering::Acquire))
    }

    pub fn set_runstate(&self, state: RunState) {
        self.runstate.store(state as u8, Ordering::Release);
    }

    /// Zone index range covered by this worker's validated range,
    /// `[zf, zl)` in the adjuster's terminology (§4.4).
    pub fn zone_range(&self) -> (usize, usize) {
        let zf = self.device.zone_index(self.range.file_offset);
        let zl = self.device.zone_index(self.range.end().saturating_sub(1)) + 1;
        (zf, zl)
    }

    pub fn min_bs(&self, direction: IoDirection) -> u64 {
        match direction {
            IoDirection::Read => self.config.read_bs.min,
            IoDirection::Write => self.config.write_bs.min,
            IoDirection::Trim | IoDirection::Sync => 0,
        }
    }
}
