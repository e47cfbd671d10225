//! Request multiplexing over one plugin's stdio pipes.
//!
//! A single reader thread owns the plugin's stdout and routes each response
//! to the caller waiting on its request id, so concurrent calls never queue
//! behind one another and may complete in any order.

use crate::host::SessionError;
use crate::protocol::{HandshakeLine, Method, Reply, Request, Response};
use drivehub_core::{Context, DriverError, DriverResult};
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// How often a blocked call re-checks its context for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct PendingCalls {
    closed: bool,
    calls: HashMap<u64, Sender<Reply>>,
}

/// Host end of a plugin connection.
pub struct Connection {
    label: String,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    pending: Arc<Mutex<PendingCalls>>,
    next_id: AtomicU64,
    call_timeout: Option<Duration>,
}

impl Connection {
    /// Starts the reader thread and waits up to `handshake_timeout` for the
    /// plugin's handshake line.
    pub fn open<R, W>(
        label: impl Into<String>,
        reader: R,
        writer: W,
        handshake_timeout: Duration,
        call_timeout: Option<Duration>,
    ) -> Result<(Self, HandshakeLine), SessionError>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let label = label.into();
        let pending = Arc::new(Mutex::new(PendingCalls::default()));
        let (handshake_tx, handshake_rx) = mpsc::channel();

        let thread_label = label.clone();
        let thread_pending = Arc::clone(&pending);
        thread::Builder::new()
            .name(format!("plugin-reader:{label}"))
            .spawn(move || read_loop(&thread_label, reader, handshake_tx, &thread_pending))
            .map_err(SessionError::Thread)?;

        let line = match handshake_rx.recv_timeout(handshake_timeout) {
            Ok(Some(line)) => line,
            Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                return Err(SessionError::Handshake {
                    reason: "plugin closed its output before the handshake".to_string(),
                })
            }
            Err(RecvTimeoutError::Timeout) => {
                return Err(SessionError::HandshakeTimeout(handshake_timeout))
            }
        };
        let handshake: HandshakeLine =
            serde_json::from_str(line.trim()).map_err(|err| SessionError::Handshake {
                reason: format!("malformed handshake line: {err}"),
            })?;

        let connection = Self {
            label,
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(1),
            call_timeout,
        };
        Ok((connection, handshake))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    /// Sends one request and blocks until its response, cancellation or the
    /// deadline. Error replies are turned into [`DriverError`]s.
    ///
    /// An abandoned call's slot is released; a response arriving later is
    /// dropped by the reader thread.
    pub fn call(&self, ctx: &Context, channel: &str, method: Method) -> DriverResult<Reply> {
        self.call_scoped(ctx, channel, None, method)
    }

    /// Like [`Connection::call`], addressed to one driver instance.
    pub fn call_scoped(
        &self,
        ctx: &Context,
        channel: &str,
        instance: Option<u64>,
        method: Method,
    ) -> DriverResult<Reply> {
        ctx.check()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let method_name = method.name();
        let (tx, rx) = mpsc::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(closed_error());
            }
            pending.calls.insert(id, tx);
        }

        let request = Request {
            id,
            channel: channel.to_string(),
            instance,
            method,
        };
        if let Err(err) = self.write_request(&request) {
            self.abandon(id);
            return Err(err);
        }

        let deadline = ctx
            .deadline()
            .or_else(|| self.call_timeout.map(|timeout| Instant::now() + timeout));
        loop {
            let wait = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(CANCEL_POLL_INTERVAL),
                None => CANCEL_POLL_INTERVAL,
            };
            match rx.recv_timeout(wait) {
                Ok(Reply::Error(err)) => return Err(err.into()),
                Ok(reply) => return Ok(reply),
                Err(RecvTimeoutError::Disconnected) => return Err(closed_error()),
                Err(RecvTimeoutError::Timeout) => {
                    let outcome = if ctx.is_cancelled() {
                        Some(DriverError::Cancelled)
                    } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        Some(DriverError::Timeout)
                    } else {
                        None
                    };
                    if let Some(err) = outcome {
                        self.abandon(id);
                        tracing::debug!(
                            plugin = %self.label,
                            channel,
                            method = method_name,
                            id,
                            error = %err,
                            "abandoned plugin call"
                        );
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Sends a request without waiting for its response, which the reader
    /// thread drops when it arrives.
    pub fn notify(&self, channel: &str, instance: Option<u64>, method: Method) -> DriverResult<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let request = Request {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            channel: channel.to_string(),
            instance,
            method,
        };
        self.write_request(&request)
    }

    /// Closes the plugin's stdin. Outstanding calls still receive responses
    /// until the plugin closes its output.
    pub fn close_writer(&self) {
        lock(&self.writer).take();
    }

    fn write_request(&self, request: &Request) -> DriverResult<()> {
        let json = serde_json::to_string(request).map_err(|err| DriverError::Protocol {
            message: format!("failed to encode request: {err}"),
        })?;
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or_else(closed_error)?;
        writeln!(writer, "{json}")
            .and_then(|_| writer.flush())
            .map_err(|err| DriverError::Transport {
                message: format!("failed to write to plugin: {err}"),
            })
    }

    fn abandon(&self, id: u64) {
        lock(&self.pending).calls.remove(&id);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn closed_error() -> DriverError {
    DriverError::Transport {
        message: "plugin connection closed".to_string(),
    }
}

fn read_loop<R: BufRead>(
    label: &str,
    mut reader: R,
    handshake: Sender<Option<String>>,
    pending: &Mutex<PendingCalls>,
) {
    let mut line = String::new();
    let first = match reader.read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(std::mem::take(&mut line)),
        Err(err) => {
            tracing::debug!(plugin = %label, error = %err, "failed to read handshake");
            None
        }
    };
    let started = first.is_some();
    // the opener may have given up already
    let _ = handshake.send(first);

    if started {
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => route_response(label, line.trim(), pending),
                Err(err) => {
                    tracing::warn!(plugin = %label, error = %err, "failed to read from plugin");
                    break;
                }
            }
        }
    }

    let mut pending = lock(pending);
    pending.closed = true;
    let orphaned = pending.calls.len();
    // dropping the senders wakes every waiting caller with a transport error
    pending.calls.clear();
    tracing::debug!(plugin = %label, orphaned, "plugin output closed");
}

fn route_response(label: &str, line: &str, pending: &Mutex<PendingCalls>) {
    if line.is_empty() {
        return;
    }
    let response: Response = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(err) => match response_id(line) {
            // fail the waiting call rather than leave it blocked
            Some(id) => {
                tracing::warn!(plugin = %label, id, error = %err, "malformed response");
                let error = DriverError::Protocol {
                    message: format!("malformed response: {err}"),
                };
                Response {
                    id,
                    result: Reply::Error(error.into()),
                }
            }
            None => {
                tracing::warn!(plugin = %label, error = %err, "discarding malformed response");
                return;
            }
        },
    };
    let waiter = lock(pending).calls.remove(&response.id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(response.result);
        }
        None => {
            tracing::debug!(plugin = %label, id = response.id, "dropping response for abandoned call");
        }
    }
}

fn response_id(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64))
}

/// A named logical endpoint on a shared [`Connection`].
///
/// Cloning is cheap; clones share the connection but no proxy may close it.
#[derive(Clone)]
pub struct Channel {
    name: String,
    connection: Arc<Connection>,
}

impl Channel {
    pub(crate) fn new(name: impl Into<String>, connection: Arc<Connection>) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, ctx: &Context, method: Method) -> DriverResult<Reply> {
        self.connection.call(ctx, &self.name, method)
    }

    pub fn call_scoped(&self, ctx: &Context, instance: u64, method: Method) -> DriverResult<Reply> {
        self.connection
            .call_scoped(ctx, &self.name, Some(instance), method)
    }

    pub fn notify(&self, instance: Option<u64>, method: Method) -> DriverResult<()> {
        self.connection.notify(&self.name, instance, method)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("plugin", &self.connection.label())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{HandshakeLine, PluginInfo};
    use drivehub_core::{CancelToken, ListArgs, Obj};
    use std::io::{self, BufReader, Read};
    use std::sync::mpsc::Receiver;

    /// Write half of an in-memory pipe.
    pub(crate) struct PipeWriter(Sender<Vec<u8>>);

    impl Write for PipeWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .send(buf.to_vec())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Read half of an in-memory pipe; EOF once every writer is gone.
    pub(crate) struct PipeReader {
        rx: Receiver<Vec<u8>>,
        buf: Vec<u8>,
        pos: usize,
    }

    impl Read for PipeReader {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.buf.len() {
                match self.rx.recv() {
                    Ok(chunk) => {
                        self.buf = chunk;
                        self.pos = 0;
                    }
                    Err(_) => return Ok(0),
                }
            }
            let n = out.len().min(self.buf.len() - self.pos);
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    pub(crate) fn pipe() -> (PipeWriter, BufReader<PipeReader>) {
        let (tx, rx) = mpsc::channel();
        (
            PipeWriter(tx),
            BufReader::new(PipeReader {
                rx,
                buf: Vec::new(),
                pos: 0,
            }),
        )
    }

    fn send_line<T: serde::Serialize>(writer: &mut PipeWriter, value: &T) {
        writeln!(writer, "{}", serde_json::to_string(value).unwrap()).unwrap();
    }

    fn list(dir: &str) -> Method {
        Method::List {
            index: 0,
            dir: Obj::folder(dir),
            args: ListArgs::default(),
        }
    }

    /// Fake plugin: handshake, then collects `batch` requests and answers
    /// them in reverse order, echoing the listed directory back.
    fn spawn_reversing_plugin(batch: usize) -> (BufReader<PipeReader>, PipeWriter) {
        let (host_writer, mut plugin_reader) = pipe();
        let (mut plugin_writer, host_reader) = pipe();
        thread::spawn(move || {
            send_line(
                &mut plugin_writer,
                &HandshakeLine::new(vec!["main".into(), "alpha".into()]),
            );
            let mut requests = Vec::new();
            let mut line = String::new();
            while plugin_reader.read_line(&mut line).unwrap() > 0 {
                let request: Request = serde_json::from_str(line.trim()).unwrap();
                line.clear();
                requests.push(request);
                if requests.len() == batch {
                    for request in requests.drain(..).rev() {
                        let result = match request.method {
                            Method::List { dir, .. } => Reply::Objs {
                                objs: vec![Obj::file(format!("{}/item", dir.path), 1)],
                            },
                            Method::Info => Reply::Info(PluginInfo::default()),
                            _ => Reply::Done,
                        };
                        send_line(
                            &mut plugin_writer,
                            &Response {
                                id: request.id,
                                result,
                            },
                        );
                    }
                }
            }
        });
        (host_reader, host_writer)
    }

    #[test]
    fn concurrent_calls_receive_their_own_responses() {
        let calls = 8;
        let (reader, writer) = spawn_reversing_plugin(calls);
        let (conn, handshake) =
            Connection::open("fake", reader, writer, Duration::from_secs(5), None).unwrap();
        assert_eq!(handshake.channels, ["main", "alpha"]);
        let conn = Arc::new(conn);

        let handles: Vec<_> = (0..calls)
            .map(|i| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || {
                    let dir = format!("/dir-{i}");
                    let reply = conn
                        .call(&Context::background(), "alpha", list(&dir))
                        .unwrap();
                    match reply {
                        Reply::Objs { objs } => assert_eq!(objs[0].path, format!("{dir}/item")),
                        other => panic!("unexpected reply {}", other.status()),
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn cancelled_call_returns_promptly() {
        // batch of two: the first call is never answered on its own
        let (reader, writer) = spawn_reversing_plugin(2);
        let (conn, _) =
            Connection::open("fake", reader, writer, Duration::from_secs(5), None).unwrap();
        let token = CancelToken::new();
        let ctx = Context::background().with_cancel(token.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let result = conn.call(&ctx, "alpha", list("/slow"));
        canceller.join().unwrap();
        assert_eq!(result.unwrap_err(), DriverError::Cancelled);
        assert!(lock(&conn.pending).calls.is_empty());
    }

    #[test]
    fn call_timeout_applies_without_deadline() {
        let (reader, writer) = spawn_reversing_plugin(2);
        let (conn, _) = Connection::open(
            "fake",
            reader,
            writer,
            Duration::from_secs(5),
            Some(Duration::from_millis(60)),
        )
        .unwrap();
        let result = conn.call(&Context::background(), "alpha", list("/slow"));
        assert_eq!(result.unwrap_err(), DriverError::Timeout);
    }

    #[test]
    fn closed_output_fails_waiting_calls() {
        let (host_writer, _plugin_reader) = pipe();
        let (mut plugin_writer, host_reader) = pipe();
        send_line(&mut plugin_writer, &HandshakeLine::new(vec!["main".into()]));
        let (conn, _) =
            Connection::open("fake", host_reader, host_writer, Duration::from_secs(5), None)
                .unwrap();
        let conn = Arc::new(conn);
        let caller = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.call(&Context::background(), "main", Method::Info))
        };
        thread::sleep(Duration::from_millis(50));
        drop(plugin_writer);
        let result = caller.join().unwrap();
        assert!(matches!(result, Err(DriverError::Transport { .. })));
        assert!(conn.is_closed());
        // later calls fail fast
        assert!(matches!(
            conn.call(&Context::background(), "main", Method::Info),
            Err(DriverError::Transport { .. })
        ));
    }

    #[test]
    fn notify_does_not_claim_a_response_slot() {
        let (reader, writer) = spawn_reversing_plugin(1);
        let (conn, _) =
            Connection::open("fake", reader, writer, Duration::from_secs(5), None).unwrap();
        conn.notify("alpha", Some(3), list("/ignored")).unwrap();
        assert!(lock(&conn.pending).calls.is_empty());

        let ctx = Context::with_timeout(Duration::from_secs(5));
        match conn.call_scoped(&ctx, "alpha", Some(3), list("/kept")).unwrap() {
            Reply::Objs { objs } => assert_eq!(objs[0].path, "/kept/item"),
            other => panic!("unexpected reply {}", other.status()),
        }
    }

    #[test]
    fn undecodable_response_fails_its_caller() {
        let (host_writer, mut plugin_reader) = pipe();
        let (mut plugin_writer, host_reader) = pipe();
        thread::spawn(move || {
            send_line(&mut plugin_writer, &HandshakeLine::new(vec!["main".into()]));
            let mut line = String::new();
            while plugin_reader.read_line(&mut line).unwrap() > 0 {
                let request: Request = serde_json::from_str(line.trim()).unwrap();
                line.clear();
                let reply = serde_json::json!({"id": request.id, "status": "FromTheFuture"});
                writeln!(plugin_writer, "{reply}").unwrap();
            }
        });
        let (conn, _) =
            Connection::open("fake", host_reader, host_writer, Duration::from_secs(5), None)
                .unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let conn = Arc::new(conn);
        let caller = Arc::clone(&conn);
        thread::spawn(move || {
            let _ = done_tx.send(caller.call(&Context::background(), "main", Method::Info));
        });
        let result = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(DriverError::Protocol { .. })));
        assert!(lock(&conn.pending).calls.is_empty());

        // the connection stays usable
        let ctx = Context::with_timeout(Duration::from_secs(5));
        assert!(matches!(
            conn.call(&ctx, "main", Method::Info),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn missing_handshake_times_out() {
        let (host_writer, _plugin_reader) = pipe();
        let (_plugin_writer, host_reader) = pipe();
        let err = Connection::open(
            "silent",
            host_reader,
            host_writer,
            Duration::from_millis(50),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::HandshakeTimeout(_)));
    }

    #[test]
    fn garbage_handshake_is_rejected() {
        let (host_writer, _plugin_reader) = pipe();
        let (mut plugin_writer, host_reader) = pipe();
        writeln!(plugin_writer, "usage: some-tool [options]").unwrap();
        let err = Connection::open(
            "tool",
            host_reader,
            host_writer,
            Duration::from_secs(5),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Handshake { .. }));
    }
}
