//! Process supervisor (spec.md §4.4). Owns the child process lifecycle,
//! wires stdin/stdout/stderr readers as workers inside the `Executor`,
//! waits for exit, collects the result, enforces exit-status and
//! result-presence invariants, and ensures resource release on every
//! exit path.
//!
//! Grounded on `extract::process::{spawn_process, process_child}`: the
//! stdin-closed, stdout/stderr-piped spawn shape and the
//! capture-error-then-forward pattern are lifted directly; what changes
//! is the destination of stream output (a write-once result slot and a
//! progress listener here, a CBOR sink there) and the addition of the
//! helper-worker wiring and the ordered failure-reporting chain that
//! spec.md §4.4 step 8 pins.

use {
    crate::{
        error::{Err, Error, Result},
        executor::{CancelToken, Executor, WorkerFn},
        job::Job,
        parser::{ProgressListener, Tally},
        reader::{Gobbler, LineReader, StreamReader},
        stopper::Stopper,
    },
    once_cell::sync::OnceCell,
    std::{
        path::{Path, PathBuf},
        process::{Command, Stdio},
        sync::Arc,
        time::Duration,
    },
    tracing::{info, instrument, warn},
};

/// Default executor quiesce budget (spec.md §4.4 step 6), used when the
/// caller doesn't supply a `Config` via `with_quiesce_timeout`.
const DEFAULT_QUIESCE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Whether the current OS is Windows-family, used to select the
/// executable suffix (spec.md §6). Exposed as a free function over a
/// string, not `cfg!(windows)`, so tests can inject either branch
/// (spec.md §9 Design Notes).
pub fn is_windows(os_name: &str) -> bool {
    os_name.eq_ignore_ascii_case("windows")
}

fn executable_name(base: &str, os_name: &str) -> String {
    if is_windows(os_name) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

/// Pre-execute configuration for a single run of the child binary.
/// Mutators are only valid before `execute()` is invoked, matching the
/// supervisor-state invariant in spec.md §3.
pub struct Supervisor {
    executable: PathBuf,
    context_name: String,
    progress_listener: Option<Arc<dyn ProgressListener>>,
    stopper: Option<Stopper>,
    stderr_carries_progress: bool,
    piped_stdin: bool,
    quiesce_timeout: Duration,
}

impl Supervisor {
    /// `executable` should be a bare name (e.g. `"ffmpeg"`); the `.exe`
    /// suffix is appended automatically on Windows-family hosts.
    pub fn new<S: Into<String>>(executable: S, context_name: S) -> Self {
        let base = executable.into();
        let os_name = std::env::consts::OS;
        let resolved = executable_name(&base, os_name);
        Self {
            executable: PathBuf::from(resolved),
            context_name: context_name.into(),
            progress_listener: None,
            stopper: None,
            stderr_carries_progress: false,
            piped_stdin: false,
            quiesce_timeout: DEFAULT_QUIESCE_TIMEOUT,
        }
    }

    pub fn with_progress_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    /// Attaches a `Stopper` so external code can request graceful or
    /// forceful termination of the child while `execute()` is running.
    pub fn with_stopper(mut self, stopper: Stopper) -> Self {
        self.stopper = Some(stopper);
        self
    }

    /// Spawns the child with a piped stdin instead of a closed one.
    /// Required for `Stopper::graceful()` to succeed (spec.md §5, §9):
    /// writing `q\n` needs somewhere to write it. Off by default, since
    /// most ffmpeg invocations never read stdin and a piped-but-unread
    /// stdin costs nothing but the option to use it later.
    pub fn with_piped_stdin(mut self, enabled: bool) -> Self {
        self.piped_stdin = enabled;
        self
    }

    /// Overrides the executor quiesce budget (spec.md §4.4 step 6),
    /// normally sourced from `Config::quiesce_timeout`.
    pub fn with_quiesce_timeout(mut self, timeout: Duration) -> Self {
        self.quiesce_timeout = timeout;
        self
    }

    /// `spec.md` §9 leaves whether the child's stderr carries progress
    /// lines (the `2>&1`-merged operating mode) as a caller decision, not
    /// a hard-coded invariant. The standard library has no portable way
    /// to splice two OS pipes into one without platform-specific unsafe
    /// code, so pipeframe resolves this by treating both streams
    /// symmetrically at the reader level instead: when set, stderr gets
    /// the same `LineReader` stdout does, rather than a discarding
    /// `Gobbler`, and either stream may win the compare-and-set into the
    /// result slot (spec.md §4.4 step 4). Off by default, since most
    /// ffmpeg invocations write progress to stderr and nothing parseable
    /// to stdout, and gobbling an unused stream is always correct.
    pub fn with_stderr_as_progress(mut self, enabled: bool) -> Self {
        self.stderr_carries_progress = enabled;
        self
    }

    /// Executes the obligations of spec.md §4.4, in order.
    #[instrument(skip(self, job), fields(context = %self.context_name))]
    pub fn execute(&self, mut job: Job) -> Result<Tally> {
        let helpers = job.take_helpers();
        let executor = Executor::new();
        for (i, helper) in helpers.into_iter().enumerate() {
            executor.execute(format!("Runnable-{}", i), helper);
        }

        // `Job::build_argv` blocks internally on any deferred `UrlSlot`
        // until its helper publishes a port, giving the happens-before
        // spec.md §5 ordering guarantee 1 demands without a bespoke
        // barrier type. If a helper instead failed outright, the
        // executor will have already captured that as an exception by
        // the time the bounded wait inside `build_argv` gives up.
        let argv = match job.build_argv() {
            Ok(argv) => argv,
            Err(e) => {
                executor.stop();
                executor.join_with_timeout(self.quiesce_timeout);
                return Err(match executor.take_exception() {
                    Some(cause) => Err::worker(cause).into(),
                    None => e,
                });
            }
        };

        info!(command = %join_for_log(&self.executable, &argv), "spawning child");

        let stdin = if self.piped_stdin { Stdio::piped() } else { Stdio::null() };
        let mut command = Command::new(&self.executable);
        command
            .args(&argv)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                executor.stop();
                executor.join_with_timeout(self.quiesce_timeout);
                return Err(Err::from(e).into());
            }
        };

        let stopper = self.stopper.clone().unwrap_or_default();
        stopper.attach(child);

        let result_slot: Arc<OnceCell<Tally>> = Arc::new(OnceCell::new());

        if let Some(stdout) = stopper.take_stdout() {
            self.start_line_reader(&executor, "StdOut", stdout, result_slot.clone());
        }
        if let Some(stderr) = stopper.take_stderr() {
            if self.stderr_carries_progress {
                self.start_line_reader(&executor, "StdErr", stderr, result_slot.clone());
            } else {
                start_gobbler(&executor, "StdErr", stderr);
            }
        }

        let wait_result = stopper.wait();

        let quiesced = executor.join_with_timeout(self.quiesce_timeout);
        if !quiesced {
            warn!("executor did not quiesce within the timeout; proceeding without killing workers");
        }

        // Cleanup phase: always runs, regardless of outcome above.
        // Destruction precedes stream closure -- killing a live child
        // first avoids a hang some platforms exhibit when closing
        // streams out from under a still-running process.
        executor.stop();
        let mut child = stopper.detach();
        if let Some(child) = child.as_mut() {
            let _ = child.kill();
        }
        drop(child);

        self.report(executor.take_exception(), wait_result, &result_slot)
    }

    /// Wires a `LineReader` onto `stream`, labelled `name` ("StdOut" or,
    /// when `with_stderr_as_progress` is set, "StdErr"). Either reader's
    /// non-null return value attempts a compare-and-set into
    /// `result_slot`; the loser is logged and dropped (spec.md §4.4
    /// step 4).
    fn start_line_reader<R>(
        &self,
        executor: &Arc<Executor>,
        name: &'static str,
        stream: R,
        result_slot: Arc<OnceCell<Tally>>,
    ) where
        R: std::io::Read + Send + 'static,
    {
        let listener = self.progress_listener.clone();
        let worker: WorkerFn = Box::new(move |_cancel: CancelToken| -> Result<()> {
            let wrapped: Option<Box<dyn ProgressListener>> = listener.map(ArcListener::boxed);
            let mut reader = LineReader::new(wrapped);
            if let Some(tally) = reader.read_stream(Box::new(stream))? {
                if result_slot.set(tally).is_err() {
                    warn!("a later result arrived after the first was already recorded; dropping");
                }
            }
            Ok(())
        });
        executor.execute(name, worker);
    }

    /// Applies the fixed priority order of spec.md §4.4 step 8: worker
    /// exception, then interruption, then non-zero exit, then empty
    /// result.
    fn report(
        &self,
        exception: Option<Error>,
        wait_result: std::io::Result<std::process::ExitStatus>,
        result_slot: &OnceCell<Tally>,
    ) -> Result<Tally> {
        if let Some(e) = exception {
            return Err(Err::worker(e).into());
        }

        let status = match wait_result {
            Ok(status) => status,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                return Err(Err::Interrupted.into())
            }
            Err(e) => return Err(e.into()),
        };

        if !status.success() {
            return Err(Err::NonZeroExit(status).into());
        }

        result_slot
            .get()
            .cloned()
            .ok_or_else(|| Err::NoResult.into())
    }
}

fn start_gobbler<R>(executor: &Arc<Executor>, name: &'static str, stream: R)
where
    R: std::io::Read + Send + 'static,
{
    let worker: WorkerFn = Box::new(move |_cancel: CancelToken| -> Result<()> {
        let mut gobbler = Gobbler::default();
        let _: Option<()> = gobbler.read_stream(Box::new(stream))?;
        Ok(())
    });
    executor.execute(name, worker);
}

/// Bridges a shared, cloneable `Arc<dyn ProgressListener>` into the
/// `Box<dyn ProgressListener>` that `LineReader::new` expects.
struct ArcListener(Arc<dyn ProgressListener>);

impl ArcListener {
    fn boxed(inner: Arc<dyn ProgressListener>) -> Box<dyn ProgressListener> {
        Box::new(Self(inner))
    }
}

impl ProgressListener for ArcListener {
    fn on_progress(&self, event: &crate::parser::Progress) {
        self.0.on_progress(event)
    }
}

/// Joins argv into a loggable command line, quoting any token containing
/// whitespace with `"`. No other escaping is performed -- a documented
/// limitation (spec.md §4.4 step 1, §6): real execution uses argv
/// arrays, never a shell, so this is informational only.
fn join_for_log(executable: &Path, argv: &[String]) -> String {
    std::iter::once(executable.display().to_string())
        .chain(argv.iter().map(|tok| {
            if tok.chars().any(char::is_whitespace) {
                format!("\"{}\"", tok)
            } else {
                tok.clone()
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_suffix_selection() {
        assert!(is_windows("Windows"));
        assert!(is_windows("WINDOWS"));
        assert!(!is_windows("linux"));
        assert!(!is_windows("darwin"));
    }

    #[test]
    fn executable_name_gains_exe_suffix_on_windows() {
        assert_eq!(executable_name("ffmpeg", "windows"), "ffmpeg.exe");
        assert_eq!(executable_name("ffmpeg", "linux"), "ffmpeg");
    }

    #[test]
    fn joined_command_quotes_whitespace_tokens() {
        let argv = vec!["-i".to_string(), "my file.mp4".to_string()];
        let joined = join_for_log(Path::new("ffmpeg"), &argv);
        assert_eq!(joined, "ffmpeg -i \"my file.mp4\"");
    }

    /// `with_piped_stdin` is the opt-in SPEC_FULL.md promises:
    /// `Stopper::graceful()` can only write `q\n` somewhere if the child
    /// was actually spawned with a piped stdin.
    #[test]
    fn with_piped_stdin_lets_graceful_stop_reach_the_child() {
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            script.path(),
            "#!/bin/sh\nread line\necho 'video:0kB audio:0kB subtitle:0kB other streams:0kB'\nexit 0\n",
        )
        .unwrap();
        make_executable(script.path());
        let script = script.into_temp_path();

        let stopper = Stopper::new();
        let stopper_for_thread = stopper.clone();
        let graceful_thread = std::thread::spawn(move || {
            // Gives `execute()` time to spawn and `attach()` the child
            // before writing the stop sequence.
            std::thread::sleep(Duration::from_millis(100));
            stopper_for_thread.graceful()
        });

        let job = crate::job::Job::builder()
            .input(crate::job::Input::file("in.mp4"))
            .output(crate::job::Output::file("out.mp4"))
            .build()
            .unwrap();

        let supervisor = Supervisor::new(
            script.to_str().unwrap().to_string(),
            "test".to_string(),
        )
        .with_piped_stdin(true)
        .with_stopper(stopper);

        let tally = supervisor.execute(job).unwrap();
        assert_eq!(tally.video_kb, 0);
        assert!(graceful_thread.join().unwrap().is_ok());
    }

    #[cfg(unix)]
    fn make_executable(path: &std::path::Path) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }

    #[cfg(not(unix))]
    fn make_executable(_path: &std::path::Path) {}
}
