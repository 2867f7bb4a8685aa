use super::dataset::DatasetWriter;
use super::frequency::FrequencyControl;
use super::host::HostIdentity;
use super::runner::{BenchmarkExecutor, BenchmarkOutput};
use super::util::pause;
use super::{format_run_id, RunError, RunRecord, SinkError, SweepConfig, SweepPoint};
use chrono::Utc;
use log::{debug, error, info, warn};
use measurements::{CounterMetrics, CounterParser, EnergyAccountant};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SweepState {
    Idle,
    SettingFrequencies,
    Stabilizing,
    Executing,
    Recording,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub total: u64,
    pub attempted: u64,
    pub completed: u64,
    /// Spawn failures and nonzero exits
    pub failed: u64,
    pub timed_out: u64,
    /// Frequency pairs followed by a stabilization pause
    pub stabilized: u64,
    pub cancelled: bool,
}

impl SweepSummary {
    pub fn failures(&self) -> u64 {
        self.failed + self.timed_out
    }
}

enum RunFailure {
    Failed,
    TimedOut,
}

fn enter(state: &mut SweepState, next: SweepState) {
    if *state != next {
        debug!("Sweep state {} -> {}", state, next);
        *state = next;
    }
}

/// Drives the full Cartesian sweep over (CPU, GPU, benchmark, size,
/// repetition), one benchmark process at a time.
pub struct SweepOrchestrator {
    config: SweepConfig,
    host: HostIdentity,
    control: Box<dyn FrequencyControl>,
    executor: Box<dyn BenchmarkExecutor>,
    energy: EnergyAccountant,
    state: SweepState,
}

impl SweepOrchestrator {
    pub fn new(
        config: SweepConfig,
        host: HostIdentity,
        control: Box<dyn FrequencyControl>,
        executor: Box<dyn BenchmarkExecutor>,
        energy: EnergyAccountant,
    ) -> Self {
        Self {
            config,
            host,
            control,
            executor,
            energy,
            state: SweepState::Idle,
        }
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Runs every sweep point, writing one row per successful run. Sink
    /// failures abort the sweep; everything else is contained per run. The
    /// sink is closed on every exit path that returns `Ok`.
    ///
    /// Run ids continue after `sink.last_run_id()`, so appended sweeps never
    /// reuse an id.
    pub fn run<W: Write>(
        &mut self,
        mut sink: DatasetWriter<W>,
        cancel: &AtomicBool,
    ) -> Result<SweepSummary, SinkError> {
        let config = &self.config;
        let timeout = config.timeout();
        let stabilization = config.stabilization();
        let inter_run_delay = config.inter_run_delay();
        let mut summary = SweepSummary {
            total: config.total_runs(),
            ..Default::default()
        };
        info!(
            "Starting sweep of {} runs on {} ({} CPU x {} GPU frequencies)",
            summary.total,
            self.host.hostname,
            config.cpu_frequencies.len(),
            config.gpu_frequencies.len()
        );

        let cpu_targets: &[u32] = if summary.total > 0 {
            &config.cpu_frequencies
        } else {
            &[]
        };
        let mut run_id = sink.last_run_id();
        'sweep: for &cpu_mhz in cpu_targets {
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                break;
            }
            enter(&mut self.state, SweepState::SettingFrequencies);
            let cpu_outcome = self.control.set_cpu_frequency(cpu_mhz);

            for &gpu_mhz in &config.gpu_frequencies {
                if cancel.load(Ordering::Relaxed) {
                    summary.cancelled = true;
                    break 'sweep;
                }
                enter(&mut self.state, SweepState::SettingFrequencies);
                let gpu_outcome = self.control.set_gpu_frequency(gpu_mhz, config.gpu_index);

                let applied = cpu_outcome.is_applied() && gpu_outcome.is_applied();
                if config.skip_stabilization_on_failure && !applied {
                    info!(
                        "Skipping stabilization, frequencies CPU={} GPU={} not fully applied",
                        cpu_mhz, gpu_mhz
                    );
                } else {
                    enter(&mut self.state, SweepState::Stabilizing);
                    if !pause(stabilization, cancel) {
                        summary.cancelled = true;
                        break 'sweep;
                    }
                    summary.stabilized += 1;
                }

                for benchmark in &config.benchmarks {
                    for &input_size in &config.input_sizes {
                        for repetition in 1..=config.repetitions {
                            if cancel.load(Ordering::Relaxed) {
                                summary.cancelled = true;
                                break 'sweep;
                            }
                            run_id += 1;
                            let point = SweepPoint {
                                run_id,
                                cpu_mhz,
                                gpu_mhz,
                                benchmark,
                                input_size,
                                repetition,
                            };
                            info!(
                                "[{}/{}] CPU={}MHz GPU={}MHz {} size={} rep={}/{}",
                                summary.attempted + 1,
                                summary.total,
                                cpu_mhz,
                                gpu_mhz,
                                benchmark.name,
                                input_size,
                                repetition,
                                config.repetitions
                            );

                            enter(&mut self.state, SweepState::Executing);
                            let argv = benchmark.command(input_size);
                            let started = Utc::now();
                            let reading = self.energy.begin();
                            let result = self.executor.run(&argv, timeout);
                            let energy_j_cpu = self.energy.finish(reading);
                            summary.attempted += 1;

                            match classify(&point, result) {
                                Ok(output) => {
                                    enter(&mut self.state, SweepState::Recording);
                                    let counters = if output.instrumented {
                                        CounterParser::parse(&output.stderr)
                                    } else {
                                        CounterMetrics::default()
                                    };
                                    let record = RunRecord::new(
                                        &point,
                                        &self.host,
                                        started,
                                        output.elapsed,
                                        energy_j_cpu,
                                        &counters,
                                    );
                                    sink.write_record(&record)?;
                                    summary.completed += 1;
                                }
                                Err(RunFailure::TimedOut) => summary.timed_out += 1,
                                Err(RunFailure::Failed) => summary.failed += 1,
                            }

                            if !pause(inter_run_delay, cancel) {
                                summary.cancelled = true;
                                break 'sweep;
                            }
                        }
                    }
                }
            }
        }

        if summary.cancelled {
            warn!("Sweep cancelled after {} of {} runs", summary.attempted, summary.total);
        }
        enter(&mut self.state, SweepState::Draining);
        let written = sink.records_written();
        sink.close()?;
        enter(&mut self.state, SweepState::Done);
        info!(
            "Sweep finished: {} completed, {} failed, {} timed out, {} records written",
            summary.completed, summary.failed, summary.timed_out, written
        );
        Ok(summary)
    }
}

/// Splits an executor result into a recordable output or a contained
/// failure, logging the failure with the run's context tag.
fn classify(
    point: &SweepPoint<'_>,
    result: Result<BenchmarkOutput, RunError>,
) -> Result<BenchmarkOutput, RunFailure> {
    let context = format!("[{}]", format_run_id(point.run_id));
    match result {
        Ok(output) if output.success() => {
            debug!("{} Exec success in {:.3}s", context, output.elapsed.as_secs_f64());
            Ok(output)
        }
        Ok(output) => {
            match output.exit_code {
                Some(code) => warn!("{} {} exited with code {}", context, point.benchmark.name, code),
                None => warn!("{} {} was terminated by a signal", context, point.benchmark.name),
            }
            if output.instrumented {
                let partial = CounterParser::parse(&output.stderr);
                if !partial.is_empty() {
                    debug!("{} Counters of failed run: {:?}", context, partial);
                }
            }
            debug!("{} stderr:\n{}", context, output.stderr.trim());
            Err(RunFailure::Failed)
        }
        Err(RunError::Timeout(limit)) => {
            warn!(
                "{} {} timed out after {:.0}s, process group killed",
                context,
                point.benchmark.name,
                limit.as_secs_f64()
            );
            Err(RunFailure::TimedOut)
        }
        Err(err) => {
            error!("{} {}", context, err);
            Err(RunFailure::Failed)
        }
    }
}
