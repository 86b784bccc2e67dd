//! Raw process events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which output pipe a chunk came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// A single line of process output, already reassembled from raw chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChunk {
    /// Which pipe produced the line
    pub stream: OutputStream,
    /// The line text, without the trailing newline
    pub text: String,
    /// When the line was read
    pub timestamp: DateTime<Utc>,
}

impl OutputChunk {
    /// Wrap a line read from one of the process pipes
    pub fn new(stream: OutputStream, text: String) -> Self {
        Self {
            stream,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// A raw event from a supervised process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessEvent {
    /// Process has started
    Started {
        /// The operating-system process id
        pid: u32,
    },
    /// A line of output was read
    Output(OutputChunk),
}
