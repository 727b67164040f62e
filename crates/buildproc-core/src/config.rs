use crate::error::{ProcessError, Result};
use crate::priority::Priority;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options applied when a process group is created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupOptions {
    /// Allow members to create children outside the group (for processes that
    /// must outlive the build, e.g. compiler servers). Only the Windows Job
    /// Object honours it; Unix and portable groups accept and ignore it.
    #[serde(default = "default_allow_breakaway")]
    pub allow_breakaway: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            allow_breakaway: default_allow_breakaway(),
        }
    }
}

impl GroupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members may not escape the group
    pub fn strict() -> Self {
        Self {
            allow_breakaway: false,
        }
    }
}

/// Everything needed to launch one tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option))]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    pub executable: PathBuf,
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub args: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Complete replacement environment, in order. `None` inherits the caller's.
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub env: Option<Vec<(String, String)>>,
    /// Bytes written to the child's stdin before it is closed
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub stdin: Option<Vec<u8>>,
    #[builder(default)]
    #[serde(default)]
    pub priority: Priority,
}

impl From<ProcessSpecBuilderError> for ProcessError {
    fn from(error: ProcessSpecBuilderError) -> Self {
        ProcessError::ConfigurationError(error.to_string())
    }
}

impl ProcessSpec {
    pub fn builder() -> ProcessSpecBuilder {
        ProcessSpecBuilder::default()
    }

    /// Reject specs that can never launch
    pub fn validate(&self) -> Result<()> {
        if self.executable.as_os_str().is_empty() {
            return Err(ProcessError::ConfigurationError(
                "executable path is empty".to_string(),
            ));
        }

        if let Some(env) = &self.env {
            for (key, value) in env {
                if key.is_empty() || key.contains('=') || key.contains('\0') {
                    return Err(ProcessError::ConfigurationError(format!(
                        "invalid environment variable name: {key:?}"
                    )));
                }
                if value.contains('\0') {
                    return Err(ProcessError::ConfigurationError(format!(
                        "environment variable {key} contains a NUL byte"
                    )));
                }
            }
        }

        if self.args.iter().any(|arg| arg.contains('\0')) {
            return Err(ProcessError::ConfigurationError(
                "argument contains a NUL byte".to_string(),
            ));
        }

        Ok(())
    }

    /// Executable plus arguments, for log lines
    pub fn display_command(&self) -> String {
        let mut line = self.executable.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl ProcessSpecBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn arg<S: ToString>(&mut self, arg: S) -> &mut Self {
        self.args
            .get_or_insert_with(Vec::new)
            .push(arg.to_string());
        self
    }

    /// Add one override variable; the first call switches the child off the
    /// inherited environment
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let env = self
            .env
            .get_or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new);
        env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self
            .env
            .get_or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new);
        for (key, value) in iter {
            env.push((key.to_string(), value.to_string()));
        }
        self
    }

    pub fn stdin<B: Into<Vec<u8>>>(&mut self, bytes: B) -> &mut Self {
        self.stdin = Some(Some(bytes.into()));
        self
    }
}

fn default_allow_breakaway() -> bool {
    true
}
