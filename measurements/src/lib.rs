//! Measurement primitives for frequency sweeps: package energy accounting
//! with counter wraparound and parsing of `perf stat` counter reports.

pub mod counters;
pub mod energy;

pub use counters::{CounterMetrics, CounterParser, PERF_EVENTS};
pub use energy::{
    energy_delta_uj, uj_to_joules, EnergyAccountant, EnergyCounter, EnergyReading, RaplCounter,
};
