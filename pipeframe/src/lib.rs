//! Process-supervision and media-pipeline driver: assembles a declarative
//! [`Job`] into an argv, spawns an external media-processing binary,
//! drains its stdout/stderr concurrently, negotiates loopback-TCP
//! sockets for in-memory I/O, and reports a typed [`Tally`] or a typed
//! [`error::Err`] failure.
//!
//! The crate does not install a global `tracing` subscriber; that choice
//! belongs to the binary, following `extract::models::init_logging`
//! being called from `do-run`'s `main`, not from library code.

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod loopback;
pub mod parser;
pub mod reader;
pub mod stopper;
pub mod supervisor;

pub use {
    config::Config,
    error::{Err, Error, Result},
    job::{HelperFactory, Input, Job, JobBuilder, Opt, Output, UrlSlot},
    loopback::{helper_worker, Negotiator, PortSink, RecvBytes, SendBytes},
    parser::{Progress, ProgressListener, Tally},
    stopper::Stopper,
    supervisor::Supervisor,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// End-to-end happy path over a real child process: a tiny shell
    /// script standing in for ffmpeg writes a progress line and a tally
    /// line to stdout, then exits zero.
    #[test]
    fn file_to_file_job_reports_the_final_tally() {
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            script.path(),
            "#!/bin/sh\necho 'frame=1 fps=30 out_time_us=1000'\necho 'video:5kB audio:1kB subtitle:0kB other streams:0kB'\nexit 0\n",
        )
        .unwrap();
        make_executable(script.path());
        let script = script.into_temp_path();

        #[derive(Default)]
        struct Capture(Mutex<Vec<Progress>>);
        impl ProgressListener for Capture {
            fn on_progress(&self, event: &Progress) {
                self.0.lock().unwrap().push(event.clone());
            }
        }
        let capture = Arc::new(Capture::default());

        let job = Job::builder()
            .input(Input::file("in.mp4"))
            .overwrite(true)
            .output(Output::file("out.mp4"))
            .build()
            .unwrap();

        let supervisor = Supervisor::new(
            script.to_str().unwrap().to_string(),
            "test".to_string(),
        )
        .with_progress_listener(capture.clone() as Arc<dyn ProgressListener>);

        let tally = supervisor.execute(job).unwrap();
        assert_eq!(tally.video_kb, 5);
        assert_eq!(tally.audio_kb, 1);
        assert_eq!(capture.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn non_zero_exit_is_reported_as_such() {
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(script.path(), "#!/bin/sh\nexit 7\n").unwrap();
        make_executable(script.path());
        let script = script.into_temp_path();

        let job = Job::builder()
            .input(Input::file("in.mp4"))
            .output(Output::file("out.mp4"))
            .build()
            .unwrap();
        let supervisor = Supervisor::new(
            script.to_str().unwrap().to_string(),
            "test".to_string(),
        );

        let err = supervisor.execute(job).unwrap_err();
        assert!(matches!(err.kind(), Err::NonZeroExit(_)));
    }

    #[test]
    fn clean_exit_with_no_tally_line_is_no_result() {
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(script.path(), "#!/bin/sh\necho 'nothing parseable here'\nexit 0\n").unwrap();
        make_executable(script.path());
        let script = script.into_temp_path();

        let job = Job::builder()
            .input(Input::file("in.mp4"))
            .output(Output::file("out.mp4"))
            .build()
            .unwrap();
        let supervisor = Supervisor::new(
            script.to_str().unwrap().to_string(),
            "test".to_string(),
        );

        let err = supervisor.execute(job).unwrap_err();
        assert!(matches!(err.kind(), Err::NoResult));
    }

    #[test]
    fn stderr_as_progress_picks_up_a_tally_written_to_stderr() {
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            script.path(),
            "#!/bin/sh\necho 'video:3kB audio:2kB subtitle:0kB other streams:0kB' 1>&2\nexit 0\n",
        )
        .unwrap();
        make_executable(script.path());
        let script = script.into_temp_path();

        let job = Job::builder()
            .input(Input::file("in.mp4"))
            .output(Output::file("out.mp4"))
            .build()
            .unwrap();
        let supervisor = Supervisor::new(
            script.to_str().unwrap().to_string(),
            "test".to_string(),
        )
        .with_stderr_as_progress(true);

        let tally = supervisor.execute(job).unwrap();
        assert_eq!(tally.video_kb, 3);
        assert_eq!(tally.audio_kb, 2);
    }

    /// spec.md §5 ordering guarantee 1: the argv assembler must never
    /// observe a socket-backed URL before its helper has published the
    /// ephemeral port the OS actually chose. `UrlSlot::resolve_blocking`
    /// is what gives this without a bespoke barrier type; this test
    /// exercises it end to end through `Job::take_helpers` +
    /// `Executor`, the same wiring `Supervisor::execute` uses.
    #[test]
    fn socket_backed_input_blocks_argv_until_helper_publishes_port() {
        let slot = UrlSlot::deferred();
        let port_sink = slot.publisher("tcp", String::new()).unwrap();
        let worker = loopback::helper_worker(
            "127.0.0.1",
            port_sink,
            SendBytes {
                source: &b""[..],
            },
        );
        let mut worker = Some(worker);
        let helper: Box<dyn HelperFactory> =
            Box::new(move || worker.take().expect("helper built more than once"));

        let mut job = Job::builder()
            .input(Input::socket(slot, helper))
            .output(Output::file("out.mp4"))
            .build()
            .unwrap();

        let helpers = job.take_helpers();
        let executor = executor::Executor::new();
        for (i, h) in helpers.into_iter().enumerate() {
            executor.execute(format!("Runnable-{}", i), h);
        }

        let argv = job.build_argv().unwrap();
        let url = &argv[1];
        assert!(url.starts_with("tcp://127.0.0.1:"), "unexpected url: {}", url);
        let port: u16 = url.rsplit(':').next().unwrap().parse().unwrap();
        assert_ne!(port, 0);

        executor.stop();
        assert!(executor.join_with_timeout(std::time::Duration::from_secs(2)));
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
