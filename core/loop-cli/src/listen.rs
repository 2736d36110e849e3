//! `listen`: a terminal review surface.
//!
//! Each dispatched request is printed with its quick replies and one line is
//! read as the answer:
//!
//! ```text
//! <n>       pick option n
//! :end      end the conversation        -> "[end]"
//! :cancel   cancel the request          -> "[cancelled]"
//! :later    dismiss; asked again after `reopen_after_secs`
//! <text>    free-form answer
//! ```
//!
//! A dismissed prompt keeps its claims, so no other listener picks it up. It
//! is remembered in the dialog correlator and offered again until it expires
//! or is answered elsewhere (e.g. via `respond`).

use loop_core::{
    AskRequest, DialogCorrelator, FeedbackResponse, FileLockManager, HandlerError,
    HandlerOutcome, LoopConfig, ProjectAffinity, Request, RequestHandler, RequestPoller,
    RequestStore, ResponseWriter, StorageConfig, CANCELLED_SENTINEL,
    END_SENTINEL,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What one line typed at the prompt means.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Answer(String),
    Later,
}

pub fn interpret_reply(line: &str, options: &[String]) -> Option<Reply> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line {
        ":end" => return Some(Reply::Answer(END_SENTINEL.to_string())),
        ":cancel" => return Some(Reply::Answer(CANCELLED_SENTINEL.to_string())),
        ":later" => return Some(Reply::Later),
        _ => {}
    }
    if let Ok(index) = line.parse::<usize>() {
        if let Some(option) = index.checked_sub(1).and_then(|i| options.get(i)) {
            return Some(Reply::Answer(option.clone()));
        }
    }
    Some(Reply::Answer(line.to_string()))
}

/// Prompts on `output`, reads answers from `input`.
pub struct TerminalHandler<R, W> {
    input: R,
    output: W,
    correlator: DialogCorrelator,
    dismissed_at: Option<Instant>,
    input_closed: bool,
}

impl<R: BufRead, W: Write> TerminalHandler<R, W> {
    pub fn new(input: R, output: W, correlator: DialogCorrelator) -> Self {
        TerminalHandler {
            input,
            output,
            correlator,
            dismissed_at: None,
            input_closed: false,
        }
    }

    /// Set once `input` reports end of file; nothing more can be answered.
    pub fn input_closed(&self) -> bool {
        self.input_closed
    }

    /// Shows `request` and blocks until a usable line (or end of input).
    fn prompt(&mut self, request: &AskRequest) -> Result<Reply, HandlerError> {
        let io_err = |e: io::Error| HandlerError::new(format!("Terminal I/O failed: {}", e));

        writeln!(self.output).map_err(io_err)?;
        writeln!(self.output, "=== Feedback requested [{}] ===", request.request_id)
            .map_err(io_err)?;
        if let Some(title) = &request.title {
            writeln!(self.output, "{}", title).map_err(io_err)?;
        }
        if let Some(context) = &request.context {
            writeln!(self.output, "project: {}", context).map_err(io_err)?;
        }
        writeln!(self.output, "{}", request.reason).map_err(io_err)?;
        for (i, option) in request.options.iter().enumerate() {
            writeln!(self.output, "  {}) {}", i + 1, option).map_err(io_err)?;
        }

        loop {
            write!(self.output, "> ").map_err(io_err)?;
            self.output.flush().map_err(io_err)?;

            let mut line = String::new();
            if self.input.read_line(&mut line).map_err(io_err)? == 0 {
                self.input_closed = true;
                return Err(HandlerError::new("Input closed"));
            }
            if let Some(reply) = interpret_reply(&line, &request.options) {
                return Ok(reply);
            }
        }
    }

    fn present(&mut self, request: &AskRequest) -> Result<HandlerOutcome, HandlerError> {
        self.correlator.set_pending(Some(request.clone()));
        match self.prompt(request)? {
            Reply::Answer(content) => {
                self.correlator.clear_if(&request.request_id);
                self.dismissed_at = None;
                Ok(HandlerOutcome::Answered(FeedbackResponse::text(content)))
            }
            Reply::Later => {
                self.dismissed_at = Some(Instant::now());
                Ok(HandlerOutcome::Presented)
            }
        }
    }

    /// The dismissed request, once `reopen_after` has passed and the
    /// correlator still holds it.
    fn due_for_reopen(&mut self, reopen_after: Duration) -> Option<AskRequest> {
        let dismissed_at = self.dismissed_at?;
        if dismissed_at.elapsed() < reopen_after {
            return None;
        }
        let pending = self.correlator.get_pending();
        if pending.is_none() {
            self.dismissed_at = None;
        }
        pending
    }

    fn forget(&mut self, request_id: &str) {
        if self.correlator.clear_if(request_id) {
            self.dismissed_at = None;
        }
    }
}

impl<R: BufRead, W: Write> RequestHandler for TerminalHandler<R, W> {
    fn handle(&mut self, request: &AskRequest) -> Result<HandlerOutcome, HandlerError> {
        self.present(request)
    }
}

pub fn run(
    storage: &StorageConfig,
    config: &LoopConfig,
    workspaces: &[PathBuf],
    once: bool,
) -> Result<(), String> {
    storage.ensure_dirs()?;

    let handler = TerminalHandler::new(
        io::stdin().lock(),
        io::stdout(),
        DialogCorrelator::new(config.dialog_ttl()),
    );
    let mut poller = RequestPoller::new(storage.clone(), config, handler);
    if !workspaces.is_empty() {
        let affinity = ProjectAffinity::new(workspaces);
        poller = poller.with_filter(Box::new(move |request: &Request| affinity.accepts(request)));
    }

    let store = RequestStore::new(storage.clone());
    let writer = ResponseWriter::new(storage.clone());

    info!(root = %storage.root().display(), "Listening for feedback requests");
    listen_loop(&mut poller, &store, &writer, config, once)
}

fn listen_loop<R: BufRead, W: Write>(
    poller: &mut RequestPoller<TerminalHandler<R, W>, FileLockManager>,
    store: &RequestStore,
    writer: &ResponseWriter,
    config: &LoopConfig,
    once: bool,
) -> Result<(), String> {
    loop {
        let report = poller.tick();
        debug!(
            dispatched = report.dispatched.len(),
            failed = report.failed,
            "Tick"
        );
        if !poller.handler().input_closed() {
            reopen_dismissed(poller, store, writer, config.reopen_after())?;
        }

        if poller.handler().input_closed() {
            info!("Input closed, no longer listening");
            break;
        }
        if once {
            break;
        }
        thread::sleep(config.poll_interval());
    }
    Ok(())
}

/// Offers the last dismissed prompt again unless it was answered elsewhere.
fn reopen_dismissed<R: BufRead, W: Write>(
    poller: &mut RequestPoller<TerminalHandler<R, W>, FileLockManager>,
    store: &RequestStore,
    writer: &ResponseWriter,
    reopen_after: Duration,
) -> Result<(), String> {
    let Some(request) = poller.handler_mut().due_for_reopen(reopen_after) else {
        return Ok(());
    };
    if store.has_left_pending(&request.request_id) {
        debug!(request_id = %request.request_id, "Dismissed request was answered elsewhere");
        poller.handler_mut().forget(&request.request_id);
        return Ok(());
    }

    match poller.handler_mut().present(&request) {
        Ok(HandlerOutcome::Answered(response)) => {
            writer.submit(&request.request_id, &response.content, None, None)?;
            poller.locks().release_claim(&request.request_id);
        }
        Ok(HandlerOutcome::Presented) => {}
        Err(_) if poller.handler().input_closed() => {}
        Err(e) => return Err(e.to_string()),
    }
    Ok(())
}
