use crate::core::dataset::DatasetWriter;
use crate::core::frequency::{Axis, FrequencyController};
use crate::core::host::{Capabilities, HostIdentity};
use crate::core::orchestrator::SweepOrchestrator;
use crate::core::runner::{BenchmarkRunner, Instrumentation};
use crate::core::{ConfigError, SweepConfig};
use crate::SweepCommand;
use log::{info, warn};
use measurements::EnergyAccountant;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

impl SweepCommand {
    /// Loads the configuration file and applies command line overrides.
    pub fn load_config(&self) -> Result<SweepConfig, ConfigError> {
        let mut config = SweepConfig::try_from(self.config.as_path())?;
        if self.apply_overrides(&mut config) {
            config.validate()?;
        }
        Ok(config)
    }

    /// Returns whether anything was overridden.
    fn apply_overrides(&self, config: &mut SweepConfig) -> bool {
        let mut changed = false;
        if let Some(output) = &self.output {
            config.output_file = output.clone();
            changed = true;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_s = timeout;
            changed = true;
        }
        if self.skip_stabilization_on_failure {
            config.skip_stabilization_on_failure = true;
            changed = true;
        }
        if self.no_perf {
            config.instrument = false;
            changed = true;
        }
        changed
    }

    /// Directory receiving `sweep.log`.
    pub fn log_directory(&self, config: &SweepConfig) -> PathBuf {
        if let Some(dir) = &self.log_dir {
            return dir.clone();
        }
        match config.output_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn handle(
        &self,
        config: SweepConfig,
        cancel: &AtomicBool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if self.dry_run {
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("Total runs: {}", config.total_runs());
            return Ok(());
        }

        info!("Loaded sweep configuration from {}", self.config.display());
        let capabilities = Capabilities::probe();
        let host = HostIdentity::resolve(&capabilities, config.gpu_index);
        capabilities.log_report(&host);

        let control = FrequencyController::for_host(&capabilities, config.use_sudo);
        info!(
            "CPU frequency strategies: [{}], GPU frequency strategies: [{}]",
            control.strategy_names(Axis::Cpu).join(", "),
            control.strategy_names(Axis::Gpu).join(", ")
        );

        let runner = BenchmarkRunner::new(instrumentation(&config, &capabilities));
        if !runner.is_instrumented() {
            info!("Running benchmarks without counter instrumentation");
        }

        let output = config.output_file.clone();
        let sink = DatasetWriter::create(&output, self.append)?;
        info!("Writing dataset to {}", output.display());

        let mut orchestrator = SweepOrchestrator::new(
            config,
            host,
            Box::new(control),
            Box::new(runner),
            EnergyAccountant::rapl(),
        );
        let summary = orchestrator.run(sink, cancel)?;

        println!(
            "Sweep {}: {}/{} runs completed, {} failed, {} timed out. Dataset: {}",
            if summary.cancelled { "cancelled" } else { "complete" },
            summary.completed,
            summary.total,
            summary.failed,
            summary.timed_out,
            display(&output)
        );
        Ok(())
    }
}

fn instrumentation(config: &SweepConfig, capabilities: &Capabilities) -> Option<Instrumentation> {
    match (config.instrument, capabilities.perf) {
        (true, true) => Some(Instrumentation::perf_stat()),
        (true, false) => {
            warn!("perf not found, counters disabled");
            None
        }
        (false, _) => None,
    }
}

fn display(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
