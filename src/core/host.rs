use super::util::tool_available;
use log::{info, warn};
use measurements::RaplCounter;
use std::fs;
use std::process::Command;

/// Host labels stamped on every record. Resolved once per sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub cpu_model: String,
    pub gpu_model: String,
}

/// What the host offers for control and instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub perf: bool,
    pub nvidia_smi: bool,
    pub cpupower: bool,
    pub rapl: bool,
}

impl Capabilities {
    pub fn probe() -> Self {
        Self {
            perf: tool_available("perf"),
            nvidia_smi: tool_available("nvidia-smi"),
            cpupower: tool_available("cpupower"),
            rapl: RaplCounter::new().is_readable(),
        }
    }

    pub fn log_report(&self, host: &HostIdentity) {
        let status = |available: bool| if available { "available" } else { "NOT FOUND" };
        info!("Hostname: {}", host.hostname);
        info!("CPU: {}", host.cpu_model);
        info!("GPU: {}", host.gpu_model);
        info!("perf: {}", status(self.perf));
        info!("nvidia-smi: {}", status(self.nvidia_smi));
        info!("cpupower: {}", status(self.cpupower));
        info!("RAPL: {}", if self.rapl { "readable" } else { "NOT ACCESSIBLE" });

        if !self.perf {
            warn!("perf not available, counter columns will be empty");
        }
        if !self.nvidia_smi {
            warn!("nvidia-smi not available, GPU frequency control is disabled");
        }
        if !self.rapl {
            warn!("RAPL not readable, energy columns will be empty");
        }
    }
}

impl HostIdentity {
    pub fn resolve(capabilities: &Capabilities, gpu_index: u32) -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let cpu_model = fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|cpuinfo| parse_cpu_model(&cpuinfo))
            .unwrap_or_else(|| "unknown".to_string());
        let gpu_model = if capabilities.nvidia_smi {
            query_gpu_name(gpu_index)
        } else {
            None
        }
        .unwrap_or_else(|| "none".to_string());

        Self {
            hostname,
            cpu_model,
            gpu_model,
        }
    }
}

pub fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("model name"))
        .find_map(|line| line.split_once(':'))
        .map(|(_, model)| model.trim().to_string())
        .filter(|model| !model.is_empty())
}

fn query_gpu_name(gpu_index: u32) -> Option<String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader", "-i"])
        .arg(gpu_index.to_string())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_model_from_cpuinfo() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel\t\t: 85\n\
                       model name\t: Intel(R) Xeon(R) Gold 6130 CPU @ 2.10GHz\nstepping\t: 4\n\
                       processor\t: 1\nmodel name\t: Intel(R) Xeon(R) Gold 6130 CPU @ 2.10GHz\n";
        assert_eq!(
            parse_cpu_model(cpuinfo).as_deref(),
            Some("Intel(R) Xeon(R) Gold 6130 CPU @ 2.10GHz")
        );
    }

    #[test]
    fn cpu_model_absent_without_model_name() {
        assert_eq!(parse_cpu_model("processor\t: 0\nmodel\t\t: 85\n"), None);
        assert_eq!(parse_cpu_model("model name\t:   \n"), None);
    }

    #[test]
    fn resolve_without_gpu_tool_reports_none() {
        let host = HostIdentity::resolve(&Capabilities::default(), 0);
        assert_eq!(host.gpu_model, "none");
        assert!(!host.hostname.is_empty());
        assert!(!host.cpu_model.is_empty());
    }
}
