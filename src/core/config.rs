use super::util::secs;
use super::{BenchmarkSpec, ConfigError, SweepConfig};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound for every duration field: one week.
pub const MAX_DURATION_S: f64 = 7.0 * 24.0 * 3600.0;

impl TryFrom<&Path> for SweepConfig {
    type Error = ConfigError;

    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }
}

impl TryFrom<&str> for SweepConfig {
    type Error = ConfigError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        Self::try_from(Path::new(path))
    }
}

impl SweepConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make a run meaningless. Empty axes are
    /// allowed and simply produce an empty sweep.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.repetitions == 0 {
            return invalid("repetitions must be a positive integer".to_string());
        }
        if let Some(size) = self.input_sizes.iter().find(|&&size| size == 0) {
            return invalid(format!("input size {} is not positive", size));
        }
        if self.cpu_frequencies.contains(&0) {
            return invalid("cpu_frequencies contains 0 MHz".to_string());
        }
        if self.gpu_frequencies.contains(&0) {
            return invalid("gpu_frequencies contains 0 MHz".to_string());
        }
        if !(self.timeout_s.is_finite() && self.timeout_s > 0.0) {
            return invalid(format!("timeout_s must be positive, got {}", self.timeout_s));
        }
        for (field, value) in [
            ("stabilization_s", self.stabilization_s),
            ("inter_run_delay_s", self.inter_run_delay_s),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{} must be non-negative, got {}", field, value));
            }
        }
        for (field, value) in [
            ("timeout_s", self.timeout_s),
            ("stabilization_s", self.stabilization_s),
            ("inter_run_delay_s", self.inter_run_delay_s),
        ] {
            if value > MAX_DURATION_S {
                return invalid(format!(
                    "{} must not exceed {} seconds, got {}",
                    field, MAX_DURATION_S, value
                ));
            }
        }
        if self.output_file.as_os_str().is_empty() {
            return invalid("output_file is empty".to_string());
        }

        let mut names = HashSet::new();
        for benchmark in &self.benchmarks {
            if benchmark.name.trim().is_empty() {
                return invalid("benchmark with empty name".to_string());
            }
            if !benchmark
                .command_template
                .contains(BenchmarkSpec::SIZE_PLACEHOLDER)
            {
                return invalid(format!(
                    "benchmark '{}' command template has no {} placeholder",
                    benchmark.name,
                    BenchmarkSpec::SIZE_PLACEHOLDER
                ));
            }
            if !names.insert(benchmark.name.as_str()) {
                log::warn!(
                    "Benchmark name '{}' appears more than once; rows will share the label",
                    benchmark.name
                );
            }
        }
        Ok(())
    }

    pub fn total_runs(&self) -> u64 {
        [
            self.cpu_frequencies.len(),
            self.gpu_frequencies.len(),
            self.benchmarks.len(),
            self.input_sizes.len(),
        ]
        .iter()
        .fold(u64::from(self.repetitions), |acc, &len| acc * len as u64)
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_s)
    }

    pub fn stabilization(&self) -> Duration {
        secs(self.stabilization_s)
    }

    pub fn inter_run_delay(&self) -> Duration {
        secs(self.inter_run_delay_s)
    }
}

impl BenchmarkSpec {
    pub const SIZE_PLACEHOLDER: &'static str = "{input_size}";

    /// Argument vector for one input size. The template is split on
    /// whitespace and executed directly, never through a shell.
    pub fn command(&self, input_size: u64) -> Vec<String> {
        self.command_template
            .replace(Self::SIZE_PLACEHOLDER, &input_size.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}
