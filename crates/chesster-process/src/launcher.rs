use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::line_stream::pump_lines;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One trimmed line read from a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// Everything needed to start one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Keep stdin open for line writes; otherwise stdin is `/dev/null`.
    pub interactive: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Renders the command line for logs and error messages.
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// Exit status reduced to what the orchestration layer acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Control surface over a running child.
#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Writes `line` plus a terminator to stdin and flushes.
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Forcefully terminates the child and reaps it.
    async fn kill(&mut self) -> io::Result<()>;

    /// Closes stdin and waits for the child to exit on its own.
    async fn wait(&mut self) -> io::Result<ExitOutcome>;
}

/// A started child: its handle plus one ordered channel carrying both pipes.
///
/// The channel closes once both stdout and stderr reach EOF.
pub struct LaunchedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub output: UnboundedReceiver<OutputLine>,
}

/// Spawns child processes. Implemented by the tokio launcher and by test fakes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<LaunchedProcess>;
}

/// Launcher backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessLauncher;

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<LaunchedProcess> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(cwd) = spec.cwd.as_ref() {
            command.current_dir(cwd);
        }
        command.kill_on_drop(true);
        command.stdin(if spec.interactive {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let (sender, output) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, OutputStream::Stdout, sender.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, OutputStream::Stderr, sender));
        }
        let stdin = child.stdin.take();
        tracing::debug!(pid = ?child.id(), command = %spec.display(), "child process spawned");

        Ok(LaunchedProcess {
            handle: Box::new(TokioProcessHandle { child, stdin }),
            output,
        })
    }
}

struct TokioProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl ProcessHandle for TokioProcessHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "child stdin is not open")
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.stdin = None;
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        self.stdin = None;
        let status = self.child.wait().await?;
        Ok(ExitOutcome {
            code: status.code(),
        })
    }
}
