//! Kernel configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use core::fmt;

use serde::{Deserialize, Serialize};

use mica_axiom::DEFAULT_SYSLOG_CAPACITY;

/// What Exec does when the program cannot be opened or loaded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecFailurePolicy {
    /// Leave registers and PC untouched; the process traps into Exec again
    #[default]
    Retrap,
    /// Write -1 to the result register and advance the PC
    ReturnError,
}

fn default_buffer_pool_capacity() -> usize {
    16
}

fn default_max_string_len() -> usize {
    1024
}

fn default_syslog_capacity() -> usize {
    DEFAULT_SYSLOG_CAPACITY
}

/// Runtime settings of the syscall layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Number of message buffers shared by all processes
    #[serde(default = "default_buffer_pool_capacity")]
    pub buffer_pool_capacity: usize,
    /// Longest C string read out of user memory, terminator excluded
    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,
    #[serde(default)]
    pub exec_failure: ExecFailurePolicy,
    /// Emit one debug line per trap
    #[serde(default)]
    pub trace_syscalls: bool,
    /// Events retained by the SysLog
    #[serde(default = "default_syslog_capacity")]
    pub syslog_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            buffer_pool_capacity: default_buffer_pool_capacity(),
            max_string_len: default_max_string_len(),
            exec_failure: ExecFailurePolicy::default(),
            trace_syscalls: false,
            syslog_capacity: default_syslog_capacity(),
        }
    }
}

impl KernelConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes the kernel cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_pool_capacity == 0 {
            return Err(ConfigError::ZeroSized("buffer_pool_capacity"));
        }
        if self.max_string_len == 0 {
            return Err(ConfigError::ZeroSized("max_string_len"));
        }
        if self.syslog_capacity == 0 {
            return Err(ConfigError::ZeroSized("syslog_capacity"));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Not valid JSON for `KernelConfig`
    Parse,
    /// A size field was zero
    ZeroSized(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse => write!(f, "malformed kernel config"),
            ConfigError::ZeroSized(field) => write!(f, "{} must be greater than zero", field),
        }
    }
}
