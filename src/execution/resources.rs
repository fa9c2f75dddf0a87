//! Resource limits for sandboxed container execution.
//!
//! Every job container runs under the same limits; they are part of the
//! engine configuration and can be tuned per deployment.

use serde::{Deserialize, Serialize};

/// Marker appended to captured output that hit `max_output_bytes`.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Execution resource limits for a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Memory limit in megabytes (swap is disabled).
    pub memory_mb: u64,
    /// CPU cores available (e.g., 0.5, 1.0, 2.0).
    pub cpu_cores: f64,
    /// Maximum number of processes allowed.
    pub max_processes: u64,
    /// Network mode (e.g., "none", "bridge").
    pub network_mode: String,
    /// Cap on captured bytes per stream (stdout and stderr separately).
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_cores: 1.0,
            max_processes: 64,
            network_mode: "none".to_string(),
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ExecutionLimits {
    /// Creates new execution limits with the given parameters.
    pub fn new(memory_mb: u64, cpu_cores: f64, max_processes: u64) -> Self {
        Self {
            memory_mb,
            cpu_cores,
            max_processes,
            ..Default::default()
        }
    }

    /// Returns memory limit in bytes.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb * 1024 * 1024) as i64
    }

    /// Returns CPU period in microseconds (fixed at 100ms).
    pub fn cpu_period(&self) -> i64 {
        100_000
    }

    /// Returns CPU quota based on cores allocated.
    ///
    /// Formula: quota = period * cores
    /// e.g., 1.0 core = 100000 quota (100% of one CPU)
    pub fn cpu_quota(&self) -> i64 {
        (self.cpu_period() as f64 * self.cpu_cores) as i64
    }

    /// Limit flags in `docker create` syntax.
    pub fn docker_run_flags(&self) -> Vec<String> {
        vec![
            format!("--memory={}m", self.memory_mb),
            format!("--memory-swap={}m", self.memory_mb),
            format!("--cpus={}", self.cpu_cores),
            format!("--pids-limit={}", self.max_processes),
            format!("--network={}", self.network_mode),
        ]
    }
}

/// Decodes captured bytes as lossy UTF-8, keeping at most `max_bytes` of them.
pub fn capture_output(bytes: &[u8], max_bytes: usize) -> String {
    if bytes.len() <= max_bytes {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut text = String::from_utf8_lossy(trim_partial_char(&bytes[..max_bytes])).into_owned();
    text.push_str(TRUNCATION_MARKER);
    text
}

/// Drops a multi-byte UTF-8 sequence left incomplete at the end of a cut.
fn trim_partial_char(bytes: &[u8]) -> &[u8] {
    let tail = bytes.len().saturating_sub(3);
    for i in (tail..bytes.len()).rev() {
        let byte = bytes[i];
        // continuation bytes are 0b10xxxxxx
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if bytes.len() - i < width { &bytes[..i] } else { bytes };
    }
    bytes
}

/// Accumulates a stream of output chunks up to a byte cap.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

impl OutputBuffer {
    /// Appends a chunk, dropping whatever exceeds `max_bytes`.
    pub fn push(&mut self, chunk: &[u8], max_bytes: usize) {
        let room = max_bytes.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Finishes the buffer into text.
    pub fn into_string(self) -> String {
        if !self.truncated {
            return String::from_utf8_lossy(&self.bytes).into_owned();
        }
        let mut text = String::from_utf8_lossy(trim_partial_char(&self.bytes)).into_owned();
        text.push_str(TRUNCATION_MARKER);
        text
    }
}
