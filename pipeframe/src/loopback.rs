//! Loopback TCP helper (spec.md §4.2, §6). Binds a server socket on the
//! loopback interface on an OS-assigned ephemeral port, publishes the
//! chosen port to a callback, then hands the listening socket to a
//! per-connection negotiator that owns its closure.
//!
//! Grounded on `formframe::models::tcp::listener`'s bind-then-accept
//! shape, re-expressed over blocking `std::net` rather than tokio: the
//! supervision contract (spec.md §4.1, §5) calls for true OS-thread
//! parallelism and workers that block on `accept()`, which is the
//! blocking-socket idiom, not the async-task idiom the teacher's
//! multi-client log listener needed. See DESIGN.md.

use {
    crate::{
        error::{Err, Result},
        executor::{CancelToken, WorkerFn},
    },
    std::net::{TcpListener, TcpStream},
    tracing::{debug, trace, warn},
};

/// Receives the ephemeral port chosen by the OS for a helper's server
/// socket. Must complete before the URL carrying that port is consumed
/// by the argv assembler (spec.md §5 ordering guarantee 1).
pub trait PortSink: Send {
    fn publish(&self, port: u16) -> Result<()>;
}

impl<F> PortSink for F
where
    F: Fn(u16) -> Result<()> + Send,
{
    fn publish(&self, port: u16) -> Result<()> {
        (self)(port)
    }
}

/// Accepts at most one connection on the handed-off server socket,
/// performs its protocol, and is responsible for closing the server
/// socket on every exit path (spec.md §4.2 step 3).
pub trait Negotiator: Send {
    fn negotiate(&mut self, server: TcpListener, cancel: &CancelToken) -> Result<()>;
}

/// Builds the worker closure the `Executor` runs for one socket-backed
/// input or output.
pub fn helper_worker<P, N>(bind_addr: &'static str, port_sink: P, mut negotiator: N) -> WorkerFn
where
    P: PortSink + 'static,
    N: Negotiator + 'static,
{
    Box::new(move |cancel: CancelToken| -> Result<()> {
        let listener = TcpListener::bind((bind_addr, 0)).map_err(Err::from)?;
        let port = listener.local_addr().map_err(Err::from)?.port();
        debug!(port, "loopback helper bound");

        port_sink.publish(port)?;
        trace!(port, "loopback helper published port");

        negotiator.negotiate(listener, &cancel)
    })
}

/// A negotiator that streams the bytes produced by `source` to the one
/// client that connects, then closes both the connection and the
/// server socket. This is the "producer" half used when a `Job`'s
/// `Input` is socket-backed.
pub struct SendBytes<R> {
    pub source: R,
}

impl<R> Negotiator for SendBytes<R>
where
    R: std::io::Read + Send,
{
    fn negotiate(&mut self, server: TcpListener, cancel: &CancelToken) -> Result<()> {
        let (mut stream, peer) = accept_one(&server, cancel)?;
        debug!(%peer, "loopback helper accepted connection");
        std::io::copy(&mut self.source, &mut stream).map_err(Err::from)?;
        stream.shutdown(std::net::Shutdown::Write).ok();
        Ok(())
    }
}

/// A negotiator that receives the bytes the child writes back, handing
/// each chunk to `sink`. This is the "consumer" half used when a `Job`'s
/// `Output` is socket-backed.
pub struct RecvBytes<W> {
    pub sink: W,
}

impl<W> Negotiator for RecvBytes<W>
where
    W: std::io::Write + Send,
{
    fn negotiate(&mut self, server: TcpListener, cancel: &CancelToken) -> Result<()> {
        let (mut stream, peer) = accept_one(&server, cancel)?;
        debug!(%peer, "loopback helper accepted connection");
        std::io::copy(&mut stream, &mut self.sink).map_err(Err::from)?;
        Ok(())
    }
}

fn accept_one(
    server: &TcpListener,
    cancel: &CancelToken,
) -> Result<(TcpStream, std::net::SocketAddr)> {
    // `accept()` itself cannot observe cancellation mid-block on stable
    // std without a nonblocking poll loop; use a short poll interval so
    // `stop()` is honoured promptly without spinning hot.
    server
        .set_nonblocking(true)
        .map_err(Err::from)?;
    loop {
        match server.accept() {
            Ok(pair) => {
                server.set_nonblocking(false).ok();
                return Ok(pair);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if cancel.is_cancelled() {
                    warn!("loopback helper cancelled before a connection arrived");
                    return Err(Err::Interrupted.into());
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
