use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO Error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML Parsing Error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("Invalid Config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO Error on dataset {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Existing dataset {0} has no run_id column")]
    MissingRunId(PathBuf),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Flush Error: {0}")]
    Flush(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    ToolFailed { command: String, status: String },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no writable scaling_setspeed knob under {0}")]
    NoKnobs(PathBuf),
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("benchmark command is empty")]
    EmptyCommand,
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to wait for benchmark: {0}")]
    Wait(std::io::Error),
    #[error("benchmark timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}
