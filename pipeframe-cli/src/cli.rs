//! Argument parsing. Grounded on `skipframe::cli`/`do-run::cli`'s
//! `generate_cli` + `ProgramArgs::init` split: a free function builds the
//! `clap::App`, a plain struct walks `ArgMatches` once at startup and
//! stores the typed result for the rest of the program to read.

use {
    clap::{crate_version, App, Arg},
    pipeframe::Config,
    std::{path::PathBuf, time::Duration},
};

/// Builds the CLI surface. Kept separate from `ProgramArgs::init` so
/// tests can exercise the `App` definition without also parsing argv.
pub fn generate_cli<'a, 'b>() -> App<'a, 'b> {
    App::new("pipeframe")
        .about("Drives an ffmpeg-compatible binary through a declarative job description")
        .author(&*env!("CARGO_PKG_AUTHORS").replace(':', "\n").leak())
        .version(crate_version!())
        .arg(
            Arg::with_name("executable")
                .long("exe")
                .takes_value(true)
                .value_name("PATH")
                .default_value("ffmpeg")
                .help("Name or path of the binary to supervise"),
        )
        .arg(
            Arg::with_name("input")
                .short("i")
                .long("input")
                .takes_value(true)
                .value_name("URL")
                .required(true)
                .multiple(true)
                .number_of_values(1)
                .help("An input URL; may be given more than once"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("URL")
                .required(true)
                .multiple(true)
                .number_of_values(1)
                .help("An output URL; may be given more than once"),
        )
        .arg(
            Arg::with_name("overwrite")
                .short("y")
                .long("overwrite")
                .takes_value(false)
                .help("Pass -y instead of -n to the child"),
        )
        .arg(
            Arg::with_name("filter_complex")
                .long("filter-complex")
                .takes_value(true)
                .value_name("GRAPH")
                .help("Value of -filter_complex"),
        )
        .arg(
            Arg::with_name("global_option")
                .long("global-opt")
                .takes_value(true)
                .value_name("FLAG[=VALUE]")
                .multiple(true)
                .number_of_values(1)
                .help("A global option, e.g. '-loglevel=error'; repeatable"),
        )
}

pub(crate) struct ProgramArgs {
    pub executable: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub overwrite: bool,
    pub filter_complex: Option<String>,
    pub global_options: Vec<(String, Option<String>)>,
    pub quiesce_timeout: Duration,
}

impl ProgramArgs {
    /// Retains relevant user defined config settings gathered from the CLI.
    pub(crate) fn init(cli: App<'_, '_>) -> Self {
        Self::init_from_matches(cli.get_matches())
    }

    fn init_from_matches(store: clap::ArgMatches<'_>) -> Self {
        let config = config_from_env();

        // `--exe`'s clap default only wins when the flag is absent *and*
        // no PIPEFRAME_CONFIG override exists; an explicit `--exe` still
        // wins over both.
        let executable = if store.occurrences_of("executable") == 0 {
            config
                .as_ref()
                .and_then(|cfg| cfg.ffmpeg_executable.clone())
                .unwrap_or_else(|| store.value_of("executable").unwrap().to_string())
        } else {
            store.value_of("executable").unwrap().to_string()
        };
        let quiesce_timeout = config
            .as_ref()
            .map(Config::quiesce_timeout)
            .unwrap_or_else(|| Config::default().quiesce_timeout());
        let inputs = values(&store, "input");
        let outputs = values(&store, "output");
        let overwrite = store.is_present("overwrite");
        let filter_complex = store.value_of("filter_complex").map(str::to_string);
        let global_options = values(&store, "global_option")
            .into_iter()
            .map(|raw| match raw.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (raw, None),
            })
            .collect();

        Self {
            executable,
            inputs,
            outputs,
            overwrite,
            filter_complex,
            global_options,
            quiesce_timeout,
        }
    }
}

fn values(store: &clap::ArgMatches, name: &str) -> Vec<String> {
    store
        .values_of(name)
        .map(|vs| vs.map(str::to_string).collect())
        .unwrap_or_default()
}

fn config_path() -> Option<PathBuf> {
    std::env::var_os("PIPEFRAME_CONFIG").map(PathBuf::from)
}

fn config_from_env() -> Option<Config> {
    let path = config_path()?;
    match Config::from_yaml_file(&path) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load PIPEFRAME_CONFIG, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_inputs_and_outputs() {
        let matches = generate_cli().get_matches_from(vec![
            "pipeframe",
            "-i",
            "a.mp4",
            "-i",
            "b.mp4",
            "-o",
            "out.mp4",
            "-y",
            "--global-opt",
            "-loglevel=error",
        ]);
        let args = ProgramArgs::init_from_matches(matches);
        assert_eq!(args.inputs, vec!["a.mp4", "b.mp4"]);
        assert_eq!(args.outputs, vec!["out.mp4"]);
        assert!(args.overwrite);
        assert_eq!(
            args.global_options,
            vec![("-loglevel".to_string(), Some("error".to_string()))]
        );
        assert_eq!(args.quiesce_timeout, Duration::from_millis(10_000));
    }
}
