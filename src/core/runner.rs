use super::RunError;
use log::debug;
use measurements::PERF_EVENTS;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long the pipes may stay open after the leader has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct BenchmarkOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    /// stderr carries a counter report
    pub instrumented: bool,
}

impl BenchmarkOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Counter tool invocation placed in front of the benchmark command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumentation {
    prefix: Vec<String>,
}

impl Instrumentation {
    pub fn perf_stat() -> Self {
        Self {
            prefix: vec![
                "perf".to_string(),
                "stat".to_string(),
                "-e".to_string(),
                PERF_EVENTS.join(","),
                "--".to_string(),
            ],
        }
    }

    pub fn wrap(&self, argv: &[String]) -> Vec<String> {
        self.prefix.iter().chain(argv).cloned().collect()
    }
}

pub trait BenchmarkExecutor {
    fn run(&mut self, argv: &[String], timeout: Duration) -> Result<BenchmarkOutput, RunError>;
}

pub struct BenchmarkRunner {
    instrumentation: Option<Instrumentation>,
}

impl BenchmarkRunner {
    pub fn new(instrumentation: Option<Instrumentation>) -> Self {
        Self { instrumentation }
    }

    pub fn direct() -> Self {
        Self::new(None)
    }

    pub fn is_instrumented(&self) -> bool {
        self.instrumentation.is_some()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

/// Waits up to `grace` for every drain thread to hit end of file.
fn drained(handles: [&JoinHandle<Vec<u8>>; 2], grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if handles.iter().all(|handle| handle.is_finished()) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    handle
        .join()
        .map(|buffer| String::from_utf8_lossy(&buffer).into_owned())
        .unwrap_or_default()
}

impl BenchmarkExecutor for BenchmarkRunner {
    /// Runs `argv` in its own process group. On timeout the whole group is
    /// killed so wrapped or forked workers cannot outlive the run.
    fn run(&mut self, argv: &[String], timeout: Duration) -> Result<BenchmarkOutput, RunError> {
        if argv.is_empty() {
            return Err(RunError::EmptyCommand);
        }
        let command = match &self.instrumentation {
            Some(instrumentation) => instrumentation.wrap(argv),
            None => argv.to_vec(),
        };
        let (program, args) = command.split_first().ok_or(RunError::EmptyCommand)?;

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.clone(),
                source,
            })?;
        let group = Pid::from_raw(child.id() as i32);
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            let _ = tx.send(child.wait());
        });

        let waited = rx.recv_timeout(timeout);
        let elapsed = started.elapsed();

        let status = match waited {
            Ok(status) => status,
            Err(reason) => {
                if let Err(err) = killpg(group, Signal::SIGKILL) {
                    debug!("killpg({}) failed: {}", group, err);
                }
                let _ = waiter.join();
                let partial = collect(stderr);
                let _ = collect(stdout);
                return match reason {
                    RecvTimeoutError::Timeout => {
                        debug!("Partial stderr of timed out run:\n{}", partial.trim());
                        Err(RunError::Timeout(timeout))
                    }
                    RecvTimeoutError::Disconnected => Err(RunError::Wait(std::io::Error::other(
                        "benchmark waiter exited without a status",
                    ))),
                };
            }
        };
        let _ = waiter.join();
        let status = status.map_err(RunError::Wait)?;

        // The leader is reaped, so the group id is only still ours while some
        // member lives. Open pipes mean a straggler does; without one the id
        // may already be free and must not be signalled.
        if !drained([&stdout, &stderr], DRAIN_GRACE) {
            debug!("Output still open after {} exited, killing group {}", program, group);
            if let Err(err) = killpg(group, Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", group, err);
            }
        }

        if let Some(signal) = status.signal() {
            debug!("{} terminated by signal {}", program, signal);
        }

        Ok(BenchmarkOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            exit_code: status.code(),
            elapsed,
            instrumented: self.is_instrumented(),
        })
    }
}
