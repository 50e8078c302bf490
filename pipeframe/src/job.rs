//! Declarative job description and argv assembler (spec.md §3, §4.5).
//!
//! Grounded on the builder style of `extract::output::{HeaderBuilder,
//! DataBuilder}` (accumulate into `Option` fields, materialise on
//! demand) and on the `OnceCell`-backed "first wins" pattern in
//! `formframe::models::tcp::FirstLast`, reused here for `UrlSlot`'s
//! write-once publish/subscribe semantics (spec.md §9's suggested
//! cleanup over mutating a shared field from a closure).

use {
    crate::{
        error::{Err, Result},
        executor::WorkerFn,
    },
    once_cell::sync::OnceCell,
    std::sync::Arc,
};

/// How long `build_argv` waits for a deferred `UrlSlot` to be published
/// before giving up. Matches the executor quiesce budget (spec.md
/// §4.4 step 6): a helper that can't bind within this window is no
/// better off being waited on longer by the argv assembler than by the
/// supervisor itself.
const URL_PUBLISH_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10_000);

/// A single `-flag [value]` pair. Order among options of the same phase
/// is significant and preserved (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opt {
    pub name: String,
    pub value: Option<String>,
}

impl Opt {
    pub fn flag<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn value<S: Into<String>, V: Into<String>>(name: S, value: V) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    fn push_tokens(&self, out: &mut Vec<String>) {
        out.push(self.name.clone());
        if let Some(v) = &self.value {
            out.push(v.clone());
        }
    }
}

/// A URL that is either known up front (file-backed) or only known once
/// a loopback helper has bound its ephemeral port (socket-backed).
///
/// Mutating a socket-backed slot from anywhere other than its port-sink
/// is rejected with `Err::IllegalState` (spec.md §4.5, §7).
#[derive(Debug, Clone)]
pub enum UrlSlot {
    Fixed(String),
    Deferred(Arc<OnceCell<String>>),
}

impl UrlSlot {
    pub fn fixed<S: Into<String>>(url: S) -> Self {
        Self::Fixed(url.into())
    }

    pub fn deferred() -> Self {
        Self::Deferred(Arc::new(OnceCell::new()))
    }

    /// The port-sink closure used to publish into a deferred slot.
    pub fn publisher(&self, scheme: &'static str, suffix: String) -> Option<impl Fn(u16) -> Result<()>> {
        match self {
            Self::Deferred(cell) => {
                let cell = cell.clone();
                Some(move |port: u16| -> Result<()> {
                    let url = format!("{}://127.0.0.1:{}{}", scheme, port, suffix);
                    cell.set(url)
                        .map_err(|_| Err::IllegalState("UrlSlot published more than once").into())
                })
            }
            Self::Fixed(_) => None,
        }
    }

    pub fn resolve(&self) -> Result<&str> {
        match self {
            Self::Fixed(url) => Ok(url.as_str()),
            Self::Deferred(cell) => cell
                .get()
                .map(String::as_str)
                .ok_or_else(|| Err::IllegalState("socket-backed URL read before its helper published a port").into()),
        }
    }

    /// Like `resolve`, but for a deferred slot, polls up to `timeout`
    /// rather than failing immediately. This is what `Job::build_argv`
    /// calls: it gives the happens-before spec.md §5 demands between a
    /// helper publishing its port and the argv assembler observing it,
    /// without a bespoke one-shot barrier type.
    pub fn resolve_blocking(&self, timeout: std::time::Duration) -> Result<String> {
        match self {
            Self::Fixed(url) => Ok(url.clone()),
            Self::Deferred(_) => {
                let deadline = std::time::Instant::now() + timeout;
                loop {
                    if let Ok(url) = self.resolve() {
                        return Ok(url.to_string());
                    }
                    if std::time::Instant::now() >= deadline {
                        return self.resolve().map(str::to_string);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            }
        }
    }

    /// Attempts an external, non-port-sink write. Always rejected for a
    /// deferred slot once helpers are in play; exists so a caller who
    /// tries `job.set_input_url(...)` on a socket-backed input gets the
    /// documented `IllegalState` error rather than silently doing
    /// nothing (spec.md §4.5).
    pub fn set_external(&self, _url: impl Into<String>) -> Result<()> {
        Err(Err::IllegalState(
            "cannot mutate a socket-backed Input/Output URL from outside its port-sink",
        )
        .into())
    }
}

/// Factory for the helper worker a socket-backed Input/Output installs
/// into the supervisor before the child is spawned.
pub trait HelperFactory: Send {
    fn build(&mut self) -> WorkerFn;
}

impl<F> HelperFactory for F
where
    F: FnMut() -> WorkerFn + Send,
{
    fn build(&mut self) -> WorkerFn {
        (self)()
    }
}

pub struct Input {
    options: Vec<Opt>,
    url: UrlSlot,
    helper: Option<Box<dyn HelperFactory>>,
}

impl Input {
    pub fn file<S: Into<String>>(url: S) -> Self {
        Self {
            options: Vec::new(),
            url: UrlSlot::fixed(url),
            helper: None,
        }
    }

    pub fn socket(url: UrlSlot, helper: Box<dyn HelperFactory>) -> Self {
        Self {
            options: Vec::new(),
            url,
            helper: Some(helper),
        }
    }

    pub fn with_option(mut self, opt: Opt) -> Self {
        self.options.push(opt);
        self
    }

    pub fn take_helper(&mut self) -> Option<WorkerFn> {
        self.helper.as_mut().map(|h| h.build())
    }

    fn push_tokens(&self, out: &mut Vec<String>) -> Result<()> {
        for opt in &self.options {
            opt.push_tokens(out);
        }
        out.push("-i".to_string());
        out.push(self.url.resolve_blocking(URL_PUBLISH_TIMEOUT)?);
        Ok(())
    }
}

pub struct Output {
    options: Vec<Opt>,
    url: UrlSlot,
    helper: Option<Box<dyn HelperFactory>>,
}

impl Output {
    pub fn file<S: Into<String>>(url: S) -> Self {
        Self {
            options: Vec::new(),
            url: UrlSlot::fixed(url),
            helper: None,
        }
    }

    pub fn stdout() -> Self {
        Self::file("-")
    }

    pub fn socket(url: UrlSlot, helper: Box<dyn HelperFactory>) -> Self {
        Self {
            options: Vec::new(),
            url,
            helper: Some(helper),
        }
    }

    pub fn with_option(mut self, opt: Opt) -> Self {
        self.options.push(opt);
        self
    }

    pub fn take_helper(&mut self) -> Option<WorkerFn> {
        self.helper.as_mut().map(|h| h.build())
    }

    fn push_tokens(&self, out: &mut Vec<String>) -> Result<()> {
        for opt in &self.options {
            opt.push_tokens(out);
        }
        out.push(self.url.resolve_blocking(URL_PUBLISH_TIMEOUT)?);
        Ok(())
    }
}

/// Ordered description of one ffmpeg invocation (spec.md §3).
pub struct Job {
    pub inputs: Vec<Input>,
    pub overwrite: bool,
    pub global_options: Vec<Opt>,
    pub filter_complex: Option<String>,
    pub outputs: Vec<Output>,
}

impl Job {
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    /// Materialises the argv in the fixed order §4.5 pins:
    /// inputs, overwrite flag, filter_complex, global options, outputs.
    ///
    /// Must be called after every socket-backed Input/Output's helper
    /// has published its port, or this returns `Err::IllegalState` by
    /// way of `UrlSlot::resolve`.
    pub fn build_argv(&self) -> Result<Vec<String>> {
        let mut argv = Vec::new();

        for input in &self.inputs {
            input.push_tokens(&mut argv)?;
        }

        argv.push(if self.overwrite { "-y" } else { "-n" }.to_string());

        if let Some(filter) = &self.filter_complex {
            argv.push("-filter_complex".to_string());
            argv.push(filter.clone());
        }

        for opt in &self.global_options {
            opt.push_tokens(&mut argv);
        }

        for output in &self.outputs {
            output.push_tokens(&mut argv)?;
        }

        Ok(argv)
    }

    /// Collects every helper worker registered on this job's inputs and
    /// outputs, in input-then-output, insertion order. The supervisor
    /// starts all of these before spawning the child (spec.md §5
    /// ordering guarantee 1).
    pub fn take_helpers(&mut self) -> Vec<WorkerFn> {
        let mut helpers = Vec::new();
        for input in &mut self.inputs {
            if let Some(h) = input.take_helper() {
                helpers.push(h);
            }
        }
        for output in &mut self.outputs {
            if let Some(h) = output.take_helper() {
                helpers.push(h);
            }
        }
        helpers
    }
}

#[derive(Default)]
pub struct JobBuilder {
    inputs: Vec<Input>,
    overwrite: bool,
    global_options: Vec<Opt>,
    filter_complex: Option<String>,
    outputs: Vec<Output>,
}

impl JobBuilder {
    pub fn input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn global_option(mut self, opt: Opt) -> Self {
        self.global_options.push(opt);
        self
    }

    pub fn filter_complex<S: Into<String>>(mut self, value: S) -> Self {
        self.filter_complex = Some(value.into());
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// Finishes the job. At least one `Output` is required (spec.md §3).
    pub fn build(self) -> Result<Job> {
        if self.outputs.is_empty() {
            return Err(Err::IllegalState("a Job requires at least one Output").into());
        }
        Ok(Job {
            inputs: self.inputs,
            overwrite: self.overwrite,
            global_options: self.global_options,
            filter_complex: self.filter_complex,
            outputs: self.outputs,
        })
    }
}
