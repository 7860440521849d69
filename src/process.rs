//! External process supervision.
//!
//! Every toolchain invocation in the crate goes through [`CommandSpec`] and
//! [`run`]: stdout/stderr are captured as whole buffers, stdin is never
//! inherited and children are placed in their own process group so that a
//! timeout or cancellation terminates the entire tree.

use crate::error::{ForgeError, Result};
use semver::Version;
use std::{
    collections::BTreeMap,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Default timeout for a compile step.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(600);
/// Default timeout for the final link step.
pub const LINK_TIMEOUT: Duration = Duration::from_secs(600);
/// Default timeout for `--version` style probes.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for `nm`/`objdump` symbol queries.
pub const SYMBOL_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit code reported when a process is killed because its timeout elapsed.
pub const EXIT_TIMEOUT: i32 = -1;
/// Exit code reported when a process is killed due to cancellation.
pub const EXIT_CANCELLED: i32 = -2;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative cancellation handle threaded through every long operation.
///
/// Cloning yields a handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. In-flight processes are killed at the next
    /// supervisor poll, workers drain without starting new compiles.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(ForgeError::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ForgeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// An argv-style command description. No shell is ever involved.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub envs: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: BTreeMap::new(),
            timeout: COMPILE_TIMEOUT,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as displayed in logs and compile errors.
    pub fn display_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

/// Captured result of a supervised process.
#[derive(Clone, Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT
    }

    pub fn cancelled(&self) -> bool {
        self.exit_code == EXIT_CANCELLED
    }
}

/// Runs the command to completion, enforcing its timeout and the
/// cancellation token.
///
/// Spawn failures (program missing, permissions) are returned as errors. A
/// process that started but was killed reports [`EXIT_TIMEOUT`] or
/// [`EXIT_CANCELLED`] in `exit_code` instead.
pub fn run(spec: &CommandSpec, cancel: &CancelToken) -> Result<ProcessOutput> {
    let start = Instant::now();
    trace!(command = %spec.display_line(), "spawning process");

    let mut child = spec
        .to_command()
        .spawn()
        .map_err(|err| ForgeError::io(err, &spec.program))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = start + spec.timeout;
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code().unwrap_or(EXIT_TIMEOUT),
            Ok(None) => {}
            Err(err) => {
                kill_tree(&mut child);
                return Err(ForgeError::io(err, &spec.program));
            }
        }
        if cancel.is_cancelled() {
            kill_tree(&mut child);
            let _ = child.wait();
            let duration = start.elapsed();
            let stdout = stdout.join().unwrap_or_default();
            let mut stderr = stderr.join().unwrap_or_default();
            push_line(&mut stderr, &format!("process cancelled: {}", spec.display_line()));
            return Ok(ProcessOutput { exit_code: EXIT_CANCELLED, stdout, stderr, duration });
        }
        if Instant::now() >= deadline {
            warn!(command = %spec.display_line(), timeout = ?spec.timeout, "process timed out");
            kill_tree(&mut child);
            let _ = child.wait();
            let duration = start.elapsed();
            let stdout = stdout.join().unwrap_or_default();
            let mut stderr = stderr.join().unwrap_or_default();
            push_line(
                &mut stderr,
                &format!("process timed out after {:?}: {}", spec.timeout, spec.display_line()),
            );
            return Ok(ProcessOutput { exit_code: EXIT_TIMEOUT, stdout, stderr, duration });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let duration = start.elapsed();
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    trace!(exit_code, ?duration, "process finished");
    Ok(ProcessOutput { exit_code, stdout, stderr, duration })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            buf = String::from_utf8_lossy(&bytes).into_owned();
        }
        buf
    })
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Terminates the child and its whole process tree.
        fn kill_tree(child: &mut Child) {
            // the child is its own process group leader, kill the group
            unsafe {
                libc::kill(-(child.id() as i32), libc::SIGKILL);
            }
            let _ = child.kill();
        }
    } else if #[cfg(windows)] {
        /// Terminates the child and its whole process tree.
        fn kill_tree(child: &mut Child) {
            let _ = Command::new("taskkill")
                .args(["/PID", &child.id().to_string(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            let _ = child.kill();
        }
    } else {
        /// Terminates the child; no tree semantics on this platform.
        fn kill_tree(child: &mut Child) {
            let _ = child.kill();
        }
    }
}

/// Locates `program` on `PATH`, using `where` on Windows and `which` elsewhere.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let lookup = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(lookup)
        .arg(program)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().next().map(|line| PathBuf::from(line.trim()))
}

/// Returns true if `program` resolves on `PATH`.
pub fn command_exists(program: &str) -> bool {
    find_executable(program).is_some()
}

/// Asks the tool for its version, trying the common flag spellings in order.
pub fn probe_version(program: &Path) -> Result<Version> {
    let cancel = CancelToken::new();
    let mut last_banner = String::new();
    for flag in ["--version", "-v", "-V", "version"] {
        let spec = CommandSpec::new(program).arg(flag).timeout(VERSION_PROBE_TIMEOUT);
        let Ok(output) = run(&spec, &cancel) else { continue };
        if output.success() {
            let banner = if output.stdout.trim().is_empty() {
                output.stderr.clone()
            } else {
                output.stdout.clone()
            };
            if let Ok(version) = crate::utils::parse_tool_version(&banner) {
                return Ok(version);
            }
            last_banner = banner;
        }
    }
    Err(ForgeError::msg(format!(
        "could not determine version of `{}`{}",
        program.display(),
        if last_banner.is_empty() {
            String::new()
        } else {
            format!(", last output: {last_banner:?}")
        }
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn captures_stdout_and_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "printf hello; exit 3"]);
        let out = run(&spec, &CancelToken::new()).unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "hello");
    }

    #[test]
    #[cfg(unix)]
    fn captures_stderr() {
        let spec = CommandSpec::new("sh").args(["-c", "echo oops >&2"]);
        let out = run(&spec, &CancelToken::new()).unwrap();
        assert!(out.success());
        assert!(out.stderr.contains("oops"));
    }

    #[test]
    #[cfg(unix)]
    fn timeout_kills_the_process() {
        let spec =
            CommandSpec::new("sleep").arg("30").timeout(Duration::from_millis(200));
        let start = Instant::now();
        let out = run(&spec, &CancelToken::new()).unwrap();
        assert!(out.timed_out());
        assert!(out.stderr.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    #[cfg(unix)]
    fn cancellation_kills_the_process() {
        let cancel = CancelToken::new();
        let killer = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };
        let spec = CommandSpec::new("sleep").arg("30");
        let out = run(&spec, &cancel).unwrap();
        killer.join().unwrap();
        assert!(out.cancelled());
    }

    #[test]
    fn missing_program_is_an_error() {
        let spec = CommandSpec::new("polyforge-definitely-not-a-binary");
        assert!(run(&spec, &CancelToken::new()).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn finds_executables_on_path() {
        assert!(command_exists("sh"));
        assert!(!command_exists("polyforge-definitely-not-a-binary"));
    }
}
