//! Request-scoped implicit output capture
//!
//! Handlers may produce output as a side effect instead of (or as well as)
//! returning it. That output goes to the [`OutputSink`] carried by the
//! request. A capture layer installs a fresh sink with
//! [`OutputCapture::begin`], calls the next layer, then folds the captured
//! text into the response with [`reconcile`].
//!
//! There is no process-wide buffer: every capture belongs to exactly one
//! request, so concurrent requests never see each other's output.

use crate::http::{HttpRequest, HttpResponse, Reply};
use crate::logging::trace;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Writer that implicit output is sent to.
///
/// Cloning yields another handle to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    buffer: Arc<Mutex<String>>,
}

impl OutputSink {
    pub fn write_text(&self, text: &str) {
        self.buffer.lock().push_str(text);
    }

    /// Formatted write, so `write!(sink, ..)` works through a shared reference.
    pub fn write_fmt(&self, args: fmt::Arguments<'_>) -> fmt::Result {
        fmt::Write::write_fmt(&mut *self.buffer.lock(), args)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    fn take(&self) -> String {
        std::mem::take(&mut *self.buffer.lock())
    }

    fn clear(&self) {
        self.buffer.lock().clear();
    }
}

/// An open capture scope.
///
/// Closed by [`finish`](Self::finish) or [`discard`](Self::discard). Dropping
/// an open capture discards whatever it holds.
#[derive(Debug)]
pub struct OutputCapture {
    sink: OutputSink,
    open: bool,
}

impl OutputCapture {
    /// Start capturing output written through `request`.
    pub fn begin(request: &mut HttpRequest) -> Self {
        let sink = OutputSink::default();
        request.output = sink.clone();
        trace!(path = %request.path, "Output capture started");
        Self { sink, open: true }
    }

    /// Close the scope and return everything captured.
    pub fn finish(mut self) -> String {
        self.open = false;
        let captured = self.sink.take();
        trace!(bytes = captured.len(), "Output capture finished");
        captured
    }

    /// Close the scope and throw away everything captured.
    pub fn discard(mut self) {
        self.open = false;
        self.sink.clear();
        trace!("Output capture discarded");
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        if self.open {
            self.sink.clear();
        }
    }
}

/// Merge an inner layer's reply and captured output into `response`.
///
/// Order is fixed: a full response replaces `response`, returned text is
/// appended next, captured output is appended last.
pub fn reconcile(response: &mut HttpResponse, reply: Reply, captured: &str) {
    match reply {
        Reply::Response(replacement) => *response = replacement,
        Reply::Text(text) => response.write(text),
        Reply::Empty => {}
    }

    if !captured.is_empty() {
        response.write(captured);
    }
}
