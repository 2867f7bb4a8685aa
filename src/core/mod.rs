pub mod config;
pub mod dataset;
pub mod error;
pub mod frequency;
pub mod host;
pub mod orchestrator;
pub mod runner;
pub mod util;

use chrono::{DateTime, Utc};
use host::HostIdentity;
use measurements::CounterMetrics;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigError, ControlError, RunError, SinkError};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkSpec {
    pub name: String,
    #[serde(alias = "cmd")]
    pub command_template: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    pub cpu_frequencies: Vec<u32>,
    pub gpu_frequencies: Vec<u32>,
    pub benchmarks: Vec<BenchmarkSpec>,
    pub input_sizes: Vec<u64>,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default = "default_output_file", alias = "output")]
    pub output_file: PathBuf,
    /// Hard wall-clock limit per benchmark run
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    /// Settling time after every frequency change
    #[serde(default = "default_stabilization_s")]
    pub stabilization_s: f64,
    /// Pause after every repetition
    #[serde(default = "default_inter_run_delay_s")]
    pub inter_run_delay_s: f64,
    #[serde(default)]
    pub gpu_index: u32,
    #[serde(default)]
    pub skip_stabilization_on_failure: bool,
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    /// Wrap benchmarks with `perf stat` when it is installed
    #[serde(default = "default_true")]
    pub instrument: bool,
}

fn default_repetitions() -> u32 {
    5
}

fn default_output_file() -> PathBuf {
    PathBuf::from("dataset.csv")
}

fn default_timeout_s() -> f64 {
    runner::DEFAULT_TIMEOUT.as_secs_f64()
}

fn default_stabilization_s() -> f64 {
    2.0
}

fn default_inter_run_delay_s() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// One cell of the sweep: a single attempted run.
#[derive(Debug, Clone, Copy)]
pub struct SweepPoint<'a> {
    pub run_id: u64,
    pub cpu_mhz: u32,
    pub gpu_mhz: u32,
    pub benchmark: &'a BenchmarkSpec,
    pub input_size: u64,
    /// 1-based
    pub repetition: u32,
}

/// One dataset row. Host fields and the kernel name borrow from state that
/// outlives the sweep; every optional measurement stays `None` when its
/// source was unavailable so the CSV cell is empty rather than zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord<'a> {
    pub timestamp: String,
    pub run_id: String,
    pub hostname: &'a str,
    pub cpu_model: &'a str,
    pub gpu_model: &'a str,
    pub kernel_name: &'a str,
    pub input_size: u64,
    #[serde(rename = "freq_cpu_MHz")]
    pub freq_cpu_mhz: u32,
    #[serde(rename = "freq_gpu_MHz")]
    pub freq_gpu_mhz: u32,
    pub time_s: f64,
    #[serde(rename = "energy_J_cpu")]
    pub energy_j_cpu: Option<f64>,
    #[serde(rename = "energy_J_gpu")]
    pub energy_j_gpu: Option<f64>,
    #[serde(rename = "edp_Js")]
    pub edp_js: Option<f64>,
    pub instructions: Option<u64>,
    pub cycles: Option<u64>,
    pub ipc: Option<f64>,
    pub cache_misses: Option<u64>,
    pub l1_misses: Option<u64>,
    /// Last-level cache misses
    pub l2_misses: Option<u64>,
    pub sm_util_percent: Option<f64>,
    pub gpu_occupancy: Option<f64>,
}

impl<'a> RunRecord<'a> {
    pub const COLUMNS: [&'static str; 21] = [
        "timestamp",
        "run_id",
        "hostname",
        "cpu_model",
        "gpu_model",
        "kernel_name",
        "input_size",
        "freq_cpu_MHz",
        "freq_gpu_MHz",
        "time_s",
        "energy_J_cpu",
        "energy_J_gpu",
        "edp_Js",
        "instructions",
        "cycles",
        "ipc",
        "cache_misses",
        "l1_misses",
        "l2_misses",
        "sm_util_percent",
        "gpu_occupancy",
    ];

    /// `started` is the moment the benchmark was launched and becomes the
    /// row timestamp.
    pub fn new(
        point: &SweepPoint<'a>,
        host: &'a HostIdentity,
        started: DateTime<Utc>,
        elapsed: Duration,
        energy_j_cpu: Option<f64>,
        counters: &CounterMetrics,
    ) -> Self {
        let time_s = elapsed.as_secs_f64();
        let energy_j_gpu = None;

        Self {
            timestamp: started.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            run_id: format_run_id(point.run_id),
            hostname: &host.hostname,
            cpu_model: &host.cpu_model,
            gpu_model: &host.gpu_model,
            kernel_name: &point.benchmark.name,
            input_size: point.input_size,
            freq_cpu_mhz: point.cpu_mhz,
            freq_gpu_mhz: point.gpu_mhz,
            time_s,
            energy_j_cpu,
            energy_j_gpu,
            edp_js: energy_delay_product(time_s, energy_j_cpu, energy_j_gpu),
            instructions: counters.instructions,
            cycles: counters.cycles,
            ipc: counters.ipc,
            cache_misses: counters.cache_misses,
            l1_misses: counters.l1_misses,
            l2_misses: counters.llc_misses,
            sm_util_percent: None,
            gpu_occupancy: None,
        }
    }
}

pub fn format_run_id(run_id: u64) -> String {
    format!("run_{:06}", run_id)
}

pub fn parse_run_id(label: &str) -> Option<u64> {
    label.strip_prefix("run_")?.parse().ok()
}

/// Duration times total energy. GPU energy only contributes when CPU energy
/// is known; without CPU energy the product is absent.
pub fn energy_delay_product(time_s: f64, cpu_j: Option<f64>, gpu_j: Option<f64>) -> Option<f64> {
    cpu_j.map(|cpu| (cpu + gpu_j.unwrap_or(0.0)) * time_s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn host() -> HostIdentity {
        HostIdentity {
            hostname: "node01".to_string(),
            cpu_model: "Test CPU @ 2.40GHz".to_string(),
            gpu_model: "none".to_string(),
        }
    }

    #[test]
    fn run_ids_are_zero_padded() {
        assert_eq!(format_run_id(1), "run_000001");
        assert_eq!(format_run_id(123456), "run_123456");
        assert!(format_run_id(9) < format_run_id(10));
        assert_eq!(parse_run_id("run_000042"), Some(42));
        assert_eq!(parse_run_id(&format_run_id(1_234_567)), Some(1_234_567));
        assert_eq!(parse_run_id("run_"), None);
        assert_eq!(parse_run_id("42"), None);
    }

    #[test]
    fn edp_requires_cpu_energy() {
        assert_eq!(energy_delay_product(2.0, Some(3.0), None), Some(6.0));
        assert_eq!(energy_delay_product(2.0, Some(3.0), Some(1.0)), Some(8.0));
        assert_eq!(energy_delay_product(2.0, None, Some(1.0)), None);
    }

    #[test]
    fn record_carries_point_host_and_counters() {
        let host = host();
        let bench = BenchmarkSpec {
            name: "dot".to_string(),
            command_template: "echo {input_size}".to_string(),
        };
        let point = SweepPoint {
            run_id: 7,
            cpu_mhz: 2400,
            gpu_mhz: 500,
            benchmark: &bench,
            input_size: 100,
            repetition: 2,
        };
        let counters = CounterMetrics {
            instructions: Some(10),
            cycles: Some(5),
            ipc: Some(2.0),
            llc_misses: Some(3),
            ..Default::default()
        };

        let started = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = RunRecord::new(
            &point,
            &host,
            started,
            Duration::from_millis(1500),
            Some(4.0),
            &counters,
        );
        assert_eq!(record.run_id, "run_000007");
        assert_eq!(record.hostname, "node01");
        assert_eq!(record.kernel_name, "dot");
        assert_eq!(record.freq_cpu_mhz, 2400);
        assert_eq!(record.time_s, 1.5);
        assert_eq!(record.edp_js, Some(6.0));
        assert_eq!(record.l2_misses, Some(3));
        assert_eq!(record.energy_j_gpu, None);
        assert_eq!(record.sm_util_percent, None);
        assert_eq!(record.timestamp, "2024-01-02T03:04:05Z");
    }
}
