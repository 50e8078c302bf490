use {
    cli::{generate_cli, ProgramArgs},
    lazy_static::lazy_static,
    pipeframe::{Err as PipeErr, Input, Job, Output, Progress, ProgressListener, Supervisor},
    std::sync::Arc,
    tracing::{info, instrument},
    tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber},
};

mod cli;

mod prelude {
    pub use pipeframe::Result;
}

use prelude::*;

lazy_static! {
    static ref ARGS: ProgramArgs = ProgramArgs::init(generate_cli());
}

/// Installs the global logger. Must run before `ARGS` is touched, or logs
/// generated while parsing the CLI are silently dropped.
fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into())),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to init logging");
}

struct StderrProgress;

impl ProgressListener for StderrProgress {
    fn on_progress(&self, event: &Progress) {
        info!(?event, "progress");
    }
}

#[instrument]
fn main() {
    init_logging();
    info!("<== pipeframe start ==>");

    if let Err(e) = run() {
        match e.kind() {
            PipeErr::NonZeroExit(status) => {
                eprintln!("child exited with a failing status: {}", status);
                std::process::exit(status.code().unwrap_or(1));
            }
            _ => {
                eprintln!("pipeframe failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run() -> Result<()> {
    let mut builder = Job::builder().overwrite(ARGS.overwrite);

    for input in &ARGS.inputs {
        builder = builder.input(Input::file(input.clone()));
    }
    for output in &ARGS.outputs {
        builder = builder.output(Output::file(output.clone()));
    }
    if let Some(filter) = &ARGS.filter_complex {
        builder = builder.filter_complex(filter.clone());
    }
    for (flag, value) in &ARGS.global_options {
        builder = builder.global_option(match value {
            Some(v) => pipeframe::Opt::value(flag.clone(), v.clone()),
            None => pipeframe::Opt::flag(flag.clone()),
        });
    }

    let job = builder.build()?;

    let supervisor = Supervisor::new(ARGS.executable.clone(), "pipeframe-cli".to_string())
        .with_progress_listener(Arc::new(StderrProgress) as Arc<dyn ProgressListener>)
        .with_quiesce_timeout(ARGS.quiesce_timeout);

    let tally = supervisor.execute(job)?;
    info!(?tally, "job finished");
    println!(
        "video: {}kB, audio: {}kB, subtitle: {}kB, other: {}kB",
        tally.video_kb, tally.audio_kb, tally.subtitle_kb, tally.other_kb
    );
    Ok(())
}
