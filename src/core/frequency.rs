use super::host::Capabilities;
use super::util::{privileged_command, CommandQuietExt};
use super::ControlError;
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use strum::Display;

pub const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Axis {
    Cpu,
    Gpu,
}

/// One way of pinning a clock. `device` is only meaningful for GPU strategies.
pub trait FrequencyStrategy {
    fn name(&self) -> &'static str;
    fn apply(&self, mhz: u32, device: u32) -> Result<(), ControlError>;
}

#[derive(Debug)]
pub enum ControlOutcome {
    Applied { strategy: &'static str },
    Failed { attempts: Vec<(&'static str, ControlError)> },
}

impl ControlOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ControlOutcome::Applied { .. })
    }
}

/// Sets clock targets for the sweep. Failures are reported, never raised.
pub trait FrequencyControl {
    fn set_cpu_frequency(&mut self, mhz: u32) -> ControlOutcome;
    fn set_gpu_frequency(&mut self, mhz: u32, device: u32) -> ControlOutcome;
}

fn run_tool(command: &mut Command) -> Result<(), ControlError> {
    let rendered = format!("{:?}", command).replace('"', "");
    let status = command.quiet().status().map_err(|source| ControlError::Spawn {
        tool: command.get_program().to_string_lossy().into_owned(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(ControlError::ToolFailed {
            command: rendered,
            status: status.to_string(),
        })
    }
}

/// `cpupower frequency-set`: switch to the userspace governor, then pin.
pub struct Cpupower {
    sudo: bool,
}

impl Cpupower {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }
}

impl FrequencyStrategy for Cpupower {
    fn name(&self) -> &'static str {
        "cpupower"
    }

    fn apply(&self, mhz: u32, _device: u32) -> Result<(), ControlError> {
        let khz = u64::from(mhz) * 1000;
        run_tool(privileged_command("cpupower", self.sudo).args(["frequency-set", "-g", "userspace"]))?;
        run_tool(
            privileged_command("cpupower", self.sudo)
                .args(["frequency-set", "-f"])
                .arg(format!("{}kHz", khz)),
        )
    }
}

/// Direct writes to every `cpuN/cpufreq/scaling_setspeed` knob.
pub struct SysfsSetspeed {
    root: PathBuf,
}

impl SysfsSetspeed {
    pub fn new() -> Self {
        Self::with_root(CPU_SYSFS_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn cpufreq_dirs(&self) -> Result<Vec<PathBuf>, ControlError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ControlError::Write {
            path: self.root.clone(),
            source,
        })?;
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| is_cpu_dir(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path().join("cpufreq"))
            .collect();
        dirs.sort();
        Ok(dirs)
    }
}

impl Default for SysfsSetspeed {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cpu_dir(name: &str) -> bool {
    name.strip_prefix("cpu")
        .is_some_and(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
}

impl FrequencyStrategy for SysfsSetspeed {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn apply(&self, mhz: u32, _device: u32) -> Result<(), ControlError> {
        let khz = (u64::from(mhz) * 1000).to_string();
        let mut written = 0usize;

        for cpufreq in self.cpufreq_dirs()? {
            let setspeed = cpufreq.join("scaling_setspeed");
            if !setspeed.is_file() {
                continue;
            }
            // scaling_setspeed is only honoured under the userspace governor
            let governor = cpufreq.join("scaling_governor");
            if let Err(err) = fs::write(&governor, "userspace") {
                debug!("Cannot switch {} to userspace: {}", governor.display(), err);
            }
            fs::write(&setspeed, &khz).map_err(|source| ControlError::Write {
                path: setspeed.clone(),
                source,
            })?;
            written += 1;
        }

        if written == 0 {
            return Err(ControlError::NoKnobs(self.root.clone()));
        }
        Ok(())
    }
}

/// `nvidia-smi -pm 1` followed by `nvidia-smi -lgc <MHz>` on one device.
pub struct NvidiaSmiLockClocks {
    sudo: bool,
}

impl NvidiaSmiLockClocks {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }
}

impl FrequencyStrategy for NvidiaSmiLockClocks {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn apply(&self, mhz: u32, device: u32) -> Result<(), ControlError> {
        let device = device.to_string();
        run_tool(
            privileged_command("nvidia-smi", self.sudo)
                .args(["-i", device.as_str(), "-pm", "1"]),
        )?;
        run_tool(
            privileged_command("nvidia-smi", self.sudo)
                .args(["-i", device.as_str(), "-lgc"])
                .arg(mhz.to_string()),
        )
    }
}

pub struct FrequencyController {
    cpu: Vec<Box<dyn FrequencyStrategy>>,
    gpu: Vec<Box<dyn FrequencyStrategy>>,
}

impl FrequencyController {
    pub fn new(cpu: Vec<Box<dyn FrequencyStrategy>>, gpu: Vec<Box<dyn FrequencyStrategy>>) -> Self {
        Self { cpu, gpu }
    }

    /// CPU: cpupower when installed, then sysfs. GPU: nvidia-smi only.
    pub fn for_host(capabilities: &Capabilities, use_sudo: bool) -> Self {
        let mut cpu: Vec<Box<dyn FrequencyStrategy>> = Vec::new();
        if capabilities.cpupower {
            cpu.push(Box::new(Cpupower::new(use_sudo)));
        }
        cpu.push(Box::new(SysfsSetspeed::new()));

        let mut gpu: Vec<Box<dyn FrequencyStrategy>> = Vec::new();
        if capabilities.nvidia_smi {
            gpu.push(Box::new(NvidiaSmiLockClocks::new(use_sudo)));
        }
        Self::new(cpu, gpu)
    }

    pub fn strategy_names(&self, axis: Axis) -> Vec<&'static str> {
        let chain = match axis {
            Axis::Cpu => &self.cpu,
            Axis::Gpu => &self.gpu,
        };
        chain.iter().map(|strategy| strategy.name()).collect()
    }

    fn apply_chain(
        axis: Axis,
        chain: &[Box<dyn FrequencyStrategy>],
        mhz: u32,
        device: u32,
    ) -> ControlOutcome {
        let mut attempts = Vec::new();
        for strategy in chain {
            match strategy.apply(mhz, device) {
                Ok(()) => {
                    info!("{} frequency set to {} MHz ({})", axis, mhz, strategy.name());
                    return ControlOutcome::Applied {
                        strategy: strategy.name(),
                    };
                }
                Err(err) => {
                    warn!("{} frequency via {} failed: {}", axis, strategy.name(), err);
                    attempts.push((strategy.name(), err));
                }
            }
        }

        if chain.is_empty() {
            warn!("No {} frequency mechanism available", axis);
        }
        warn!(
            "Cannot set {} frequency to {} MHz, continuing with current frequency",
            axis, mhz
        );
        ControlOutcome::Failed { attempts }
    }
}

impl FrequencyControl for FrequencyController {
    fn set_cpu_frequency(&mut self, mhz: u32) -> ControlOutcome {
        Self::apply_chain(Axis::Cpu, &self.cpu, mhz, 0)
    }

    fn set_gpu_frequency(&mut self, mhz: u32, device: u32) -> ControlOutcome {
        Self::apply_chain(Axis::Gpu, &self.gpu, mhz, device)
    }
}
