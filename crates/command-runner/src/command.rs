//! Command type for building executable commands

use async_process::Command as AsyncCommand;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// A command to be executed
///
/// This is a builder for creating commands that can be converted to
/// `async_process::Command` when needed. Unlike `AsyncCommand`, this type is
/// `Clone` and can be reused multiple times.
#[derive(Debug, Clone)]
pub struct Command {
    /// The program to execute
    program: OsString,
    /// The arguments to pass to the program
    args: Vec<OsString>,
    /// Environment variables to set
    env: HashMap<OsString, OsString>,
    /// Working directory for the command
    current_dir: Option<PathBuf>,
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
        }
    }

    /// Create a command that runs a shell snippet via the platform shell.
    ///
    /// Uses `sh -c` on Unix and `cmd.exe /c` on Windows.
    pub fn shell(snippet: impl AsRef<str>) -> Self {
        #[cfg(unix)]
        {
            let mut cmd = Self::new("sh");
            cmd.arg("-c").arg(snippet.as_ref());
            cmd
        }
        #[cfg(not(unix))]
        {
            let mut cmd = Self::new("cmd.exe");
            cmd.arg("/c").arg(snippet.as_ref());
            cmd
        }
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_owned(), val.as_ref().to_owned());
        self
    }

    /// Set multiple environment variables
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, val) in vars {
            self.env(key, val);
        }
        self
    }

    /// Set the working directory for the command
    pub fn current_dir<P: AsRef<std::path::Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Get the arguments
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Convert this command into an `async_process::Command` ready to spawn.
    ///
    /// The spawned process inherits the ambient environment; explicitly set
    /// variables are layered on top and win on conflict.
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(&self.args);
        for (key, val) in &self.env {
            cmd.env(key, val);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Render the command for log output
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello").args(["a", "b"]).env("FOO", "bar");

        assert_eq!(cmd.get_program(), "echo");
        assert_eq!(cmd.get_args().len(), 3);
        assert_eq!(cmd.display(), "echo hello a b");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_command() {
        let cmd = Command::shell("echo hi");
        assert_eq!(cmd.get_program(), "sh");
        assert_eq!(cmd.get_args()[0], "-c");
        assert_eq!(cmd.get_args()[1], "echo hi");
    }
}
