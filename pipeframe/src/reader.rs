//! Stream reader contract (spec.md §4.3): a polymorphic consumer of an
//! input byte stream that returns an optional result or raises.
//!
//! Grounded on `extract::process::process_child_output`'s line-scanning
//! loop over a child's stdout/stderr, generalized into a trait so the
//! supervisor can wire either a line parser or a no-op drain onto any
//! stream handle.

use {
    crate::{error::Result, parser},
    std::io::{self, BufRead, BufReader, Read},
};

/// Consumes `read` to EOF (or until an I/O error), returning an optional
/// result of type `T`.
pub trait StreamReader<T>: Send {
    fn read_stream(&mut self, read: Box<dyn Read + Send>) -> Result<Option<T>>;
}

/// The default reader: drains the stream and discards every byte.
///
/// Exists so that an unread stream never wedges the child on a full pipe
/// buffer (spec.md §4.3). Any output handle the caller doesn't otherwise
/// care about should get a `Gobbler`.
#[derive(Default)]
pub struct Gobbler;

impl<T> StreamReader<T> for Gobbler {
    fn read_stream(&mut self, mut read: Box<dyn Read + Send>) -> Result<Option<T>> {
        let mut sink = io::sink();
        io::copy(&mut read, &mut sink)?;
        Ok(None)
    }
}

/// A line-oriented reader that classifies every line as a progress
/// event or noise, and retains the last successfully parsed final-result
/// tally (spec.md §4.6). Progress events are forwarded to `listener`.
pub struct LineReader {
    listener: Option<Box<dyn parser::ProgressListener>>,
}

impl LineReader {
    pub fn new(listener: Option<Box<dyn parser::ProgressListener>>) -> Self {
        Self { listener }
    }
}

impl StreamReader<parser::Tally> for LineReader {
    fn read_stream(
        &mut self,
        read: Box<dyn Read + Send>,
    ) -> Result<Option<parser::Tally>> {
        let buffered = BufReader::new(read);
        let mut last_tally = None;

        for line in buffered.lines() {
            let line = line?;
            match parser::classify(&line) {
                parser::Classified::Progress(event) => {
                    if let Some(listener) = self.listener.as_deref_mut() {
                        listener.on_progress(&event);
                    }
                }
                parser::Classified::Tally(tally) => last_tally = Some(tally),
                parser::Classified::Noise => tracing::info!(line = %line, "child output"),
            }
        }

        Ok(last_tally)
    }
}
