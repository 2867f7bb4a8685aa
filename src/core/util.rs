use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const PAUSE_SLICE: Duration = Duration::from_millis(100);

pub trait CommandQuietExt {
    /// Detach all standard streams; only the exit status is of interest.
    fn quiet(&mut self) -> &mut Self;
}

impl CommandQuietExt for Command {
    fn quiet(&mut self) -> &mut Self {
        self.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
    }
}

/// `program`, or `sudo -n program` when elevated rights are requested.
/// Non-interactive sudo fails fast instead of blocking the sweep on a prompt.
pub fn privileged_command(program: &str, sudo: bool) -> Command {
    if sudo {
        let mut command = Command::new("sudo");
        command.arg("-n").arg(program);
        command
    } else {
        Command::new(program)
    }
}

pub fn tool_available(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|path| find_in_path(name, &path))
        .is_some()
}

/// First executable regular file called `name` in a `PATH`-style list.
pub fn find_in_path(name: &str, path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Converts validated seconds to a `Duration`. Negative or NaN values give
/// zero, values beyond the `Duration` range saturate.
pub fn secs(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

/// Sleeps for `duration` in short slices, returning early with `false` once
/// `cancel` is raised. A duration past the clock's range waits for
/// cancellation only.
pub fn pause(duration: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now().checked_add(duration);
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return true;
                }
                PAUSE_SLICE.min(deadline - now)
            }
            None => PAUSE_SLICE,
        };
        std::thread::sleep(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_completes_when_not_cancelled() {
        let cancel = AtomicBool::new(false);
        let started = Instant::now();
        assert!(pause(Duration::from_millis(30), &cancel));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(pause(Duration::ZERO, &cancel));
    }

    #[test]
    fn pause_returns_immediately_when_cancelled() {
        let cancel = AtomicBool::new(true);
        let started = Instant::now();
        assert!(!pause(Duration::from_secs(10), &cancel));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn secs_saturates_instead_of_collapsing_to_zero() {
        assert_eq!(secs(1.5), Duration::from_millis(1500));
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(1e20), Duration::MAX);
        assert_eq!(secs(f64::INFINITY), Duration::MAX);
    }

    #[test]
    fn unbounded_pause_waits_for_cancellation() {
        let cancel = std::sync::Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let raiser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            flag.store(true, Ordering::Relaxed);
        });
        let started = Instant::now();
        assert!(!pause(Duration::MAX, &cancel));
        assert!(started.elapsed() >= Duration::from_millis(150));
        raiser.join().unwrap();
    }

    #[test]
    fn path_lookup_requires_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("cpupower");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();
        let path = std::env::join_paths(["/nonexistent-dir", dir.path().to_str().unwrap()]).unwrap();
        assert_eq!(find_in_path("cpupower", &path), None);

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_in_path("cpupower", &path), Some(tool));
        assert_eq!(find_in_path("nvidia-smi", &path), None);
        std::fs::create_dir(dir.path().join("perf")).unwrap();
        assert_eq!(find_in_path("perf", &path), None);
    }

    #[test]
    fn tool_lookup_uses_process_path() {
        assert!(tool_available("sh"));
        assert!(!tool_available("definitely-not-an-installed-tool"));
    }

    #[test]
    fn privileged_command_prefixes_sudo() {
        let command = privileged_command("cpupower", true);
        assert_eq!(command.get_program(), "sudo");
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["-n", "cpupower"]);

        assert_eq!(privileged_command("cpupower", false).get_program(), "cpupower");
    }
}
