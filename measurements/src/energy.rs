use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

/// Package-0 energy register exposed by the powercap framework.
pub const RAPL_PKG_ENERGY_PATH: &str = "/sys/class/powercap/intel-rapl:0/energy_uj";

/// The package energy register is a 32-bit rolling counter.
pub const RAPL_WRAP_MODULUS: u64 = 1 << 32;

/// A monotonic energy counter in microjoules.
///
/// Implementations return `None` whenever the source cannot be read; callers
/// treat that as "energy unavailable for this run" rather than as an error.
pub trait EnergyCounter {
    fn read_energy_uj(&self) -> Option<u64>;
}

#[derive(Debug, Clone)]
pub struct RaplCounter {
    path: PathBuf,
}

impl RaplCounter {
    pub fn new() -> Self {
        Self::with_path(RAPL_PKG_ENERGY_PATH)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readable(&self) -> bool {
        self.read_energy_uj().is_some()
    }
}

impl Default for RaplCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EnergyCounter for RaplCounter {
    fn read_energy_uj(&self) -> Option<u64> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
    }
}

/// Counter difference corrected for a single wraparound of the register.
///
/// Returns `None` when the corrected value is still negative, which means the
/// readings cannot come from the same 32-bit register.
pub fn energy_delta_uj(before: u64, after: u64) -> Option<u64> {
    let mut delta = i128::from(after) - i128::from(before);
    if delta < 0 {
        delta += i128::from(RAPL_WRAP_MODULUS);
    }
    u64::try_from(delta).ok()
}

pub fn uj_to_joules(microjoules: u64) -> f64 {
    microjoules as f64 / 1e6
}

/// Reading taken immediately before a benchmark starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyReading {
    start_uj: Option<u64>,
}

impl EnergyReading {
    pub fn start_uj(&self) -> Option<u64> {
        self.start_uj
    }
}

pub struct EnergyAccountant {
    counter: Box<dyn EnergyCounter>,
}

impl EnergyAccountant {
    pub fn new(counter: Box<dyn EnergyCounter>) -> Self {
        Self { counter }
    }

    pub fn rapl() -> Self {
        Self::new(Box::new(RaplCounter::new()))
    }

    pub fn begin(&self) -> EnergyReading {
        EnergyReading {
            start_uj: self.counter.read_energy_uj(),
        }
    }

    /// Energy in joules consumed since `reading`, or `None` if either side of
    /// the interval could not be read.
    pub fn finish(&self, reading: EnergyReading) -> Option<f64> {
        let end_uj = self.counter.read_energy_uj();
        let (before, after) = (reading.start_uj?, end_uj?);
        match energy_delta_uj(before, after) {
            Some(delta) => Some(uj_to_joules(delta)),
            None => {
                warn!(
                    "Energy counter went from {} to {} uJ, beyond a single wraparound; dropping reading",
                    before, after
                );
                None
            }
        }
    }
}
