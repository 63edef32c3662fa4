//! Session management
//!
//! A [`Session`] ties one child process to one terminal screen: it spawns
//! the child on a PTY, pumps its output through the UTF-8 decoder and the
//! VT parser, gates keyboard input through XON/XOFF flow control, and
//! surfaces everything noteworthy as [`SessionEvent`]s.
//!
//! The PTY is read on a dedicated thread that ships raw chunks over a
//! channel; all interpretation happens on the thread that calls
//! [`Session::process_output`], so the screen needs no locking.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::pty::{Pty, PtyError};
use super::term::{Emulation, Screen, TermEvent};
use crate::config::Profile;
use crate::history::HistoryType;
use crate::keymap::KeyTable;

const XON: u8 = 0x11;
const XOFF: u8 = 0x13;

/// Queued bytes past this point trigger a backpressure report.
const BACKPRESSURE_THRESHOLD: usize = 64 * 1024;

/// How long a closed session waits for the child before killing it.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to start session for '{program}'")]
    ProcessSpawn {
        program: String,
        #[source]
        source: PtyError,
    },

    #[error(transparent)]
    Pty(#[from] PtyError),
}

/// Events surfaced to the embedding layer, drained via
/// [`Session::next_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// New output was interpreted; the screen changed
    Output,
    /// BEL from the child
    Bell,
    /// OSC title change
    TitleChanged(String),
    /// Output arrived (debounced, only when monitoring is on)
    Activity,
    /// No output for the configured timeout (one-shot per quiet period)
    Silence,
    /// Flow control has queued more input than the threshold
    FlowControlBackpressure,
    /// The history backend was swapped; prior scrollback is gone
    HistoryReset,
    /// The child exited with this code, if one could be collected
    Finished(Option<u32>),
}

/// XON/XOFF gate on the input path.
///
/// While suspended, submitted bytes are queued rather than written;
/// resuming returns everything queued, in order. Submission never fails.
pub(crate) struct FlowControlGate {
    enabled: bool,
    suspended: bool,
    queue: VecDeque<u8>,
    reported: bool,
}

impl FlowControlGate {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            suspended: false,
            queue: VecDeque::new(),
            reported: false,
        }
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.enabled && self.suspended
    }

    /// Pass bytes through, or queue them while suspended.
    pub(crate) fn submit(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        if self.is_suspended() {
            self.queue.extend(bytes);
            None
        } else {
            Some(bytes.to_vec())
        }
    }

    pub(crate) fn suspend(&mut self) {
        if self.enabled {
            self.suspended = true;
        }
    }

    /// Lift the suspension and return the queued bytes for writing.
    pub(crate) fn resume(&mut self) -> Vec<u8> {
        self.suspended = false;
        self.reported = false;
        self.queue.drain(..).collect()
    }

    /// One-shot: true the first time the queue crosses the threshold.
    pub(crate) fn backpressure_crossed(&mut self) -> bool {
        if !self.reported && self.queue.len() > BACKPRESSURE_THRESHOLD {
            self.reported = true;
            return true;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }
}

/// Debounced activity and one-shot silence detection, pure `Instant`
/// arithmetic so it is testable without a clock.
pub(crate) struct ActivityMonitor {
    monitor_activity: bool,
    monitor_silence: bool,
    debounce: Duration,
    silence_timeout: Duration,
    last_output: Instant,
    last_activity_event: Option<Instant>,
    silence_fired: bool,
}

impl ActivityMonitor {
    pub(crate) fn new(profile: &Profile, now: Instant) -> Self {
        Self {
            monitor_activity: profile.monitor_activity,
            monitor_silence: profile.monitor_silence,
            debounce: profile.activity_debounce(),
            silence_timeout: profile.silence_timeout(),
            last_output: now,
            last_activity_event: None,
            silence_fired: false,
        }
    }

    /// Record output at `now`; returns true when an Activity event is due.
    pub(crate) fn note_output(&mut self, now: Instant) -> bool {
        self.last_output = now;
        self.silence_fired = false;
        if !self.monitor_activity {
            return false;
        }
        match self.last_activity_event {
            Some(last) if now.duration_since(last) < self.debounce => false,
            _ => {
                self.last_activity_event = Some(now);
                true
            }
        }
    }

    /// Returns true when a Silence event is due at `now`. Fires once per
    /// quiet period; new output re-arms it.
    pub(crate) fn poll(&mut self, now: Instant) -> bool {
        if !self.monitor_silence || self.silence_fired {
            return false;
        }
        if now.duration_since(self.last_output) >= self.silence_timeout {
            self.silence_fired = true;
            return true;
        }
        false
    }
}

/// Incremental UTF-8 decoder. Sequences split across read chunks are
/// buffered; invalid bytes decode to U+FFFD and never abort.
#[derive(Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, input: &[u8]) -> String {
        self.pending.extend_from_slice(input);
        let mut out = String::new();
        let mut consumed = 0;

        loop {
            let rest = &self.pending[consumed..];
            if rest.is_empty() {
                break;
            }
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    consumed += rest.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or(""));
                    consumed += valid;
                    match e.error_len() {
                        Some(len) => {
                            out.push('\u{FFFD}');
                            consumed += len;
                        }
                        None => {
                            // incomplete trailing sequence, wait for more
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        // cap the holdover: anything longer than 4 bytes cannot become valid
        if self.pending.len() > 4 {
            for _ in 0..self.pending.len() {
                out.push('\u{FFFD}');
            }
            self.pending.clear();
        }
        out
    }
}

/// One child process and its terminal state.
pub struct Session {
    profile: Profile,
    /// The terminal grid; the embedder reads it through a ScreenWindow
    pub screen: Screen,
    emulation: Emulation,
    pty: Option<Pty>,
    writer: Option<Box<dyn Write + Send>>,
    running: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    output_rx: Option<Receiver<Vec<u8>>>,
    decoder: Utf8Decoder,
    gate: FlowControlGate,
    monitor: ActivityMonitor,
    events: VecDeque<SessionEvent>,
    finished_reported: bool,
}

impl Session {
    pub fn new(profile: Profile, cols: u16, rows: u16, key_table: Arc<KeyTable>) -> Self {
        let screen = Screen::new(cols, rows, profile.history.history_type());
        let gate = FlowControlGate::new(profile.flow_control);
        let monitor = ActivityMonitor::new(&profile, Instant::now());
        Self {
            profile,
            screen,
            emulation: Emulation::new(key_table),
            pty: None,
            writer: None,
            running: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
            output_rx: None,
            decoder: Utf8Decoder::default(),
            gate,
            monitor,
            events: VecDeque::new(),
            finished_reported: false,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Whether the embedder should dispose of the session once it finishes.
    pub fn auto_close(&self) -> bool {
        self.profile.auto_close
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the child and the reader thread. Calling this on an already
    /// started session does nothing.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.pty.is_some() {
            return Ok(());
        }

        let program = self.profile.resolve_program();
        let mut pty = Pty::spawn(
            &program,
            &self.profile.arguments,
            &self.profile.environment,
            self.profile.working_directory.as_deref(),
            self.screen.cols(),
            self.screen.rows(),
        )
        .map_err(|source| SessionError::ProcessSpawn {
            program: program.clone(),
            source,
        })?;

        self.writer = Some(pty.take_writer()?);
        let mut reader = pty.try_clone_reader()?;
        self.pty = Some(pty);
        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        self.output_rx = Some(rx);

        let running = self.running.clone();
        let reader_thread = thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        // EOF: the child closed its side
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "pty reader stopped");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });
        self.reader_thread = Some(reader_thread);

        Ok(())
    }

    /// Drain pending PTY output and interpret it. Returns true when the
    /// screen changed. Must be called from the driving thread.
    pub fn process_output(&mut self) -> bool {
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let mut disconnected = false;

        if let Some(rx) = &self.output_rx {
            loop {
                match rx.try_recv() {
                    Ok(data) => chunks.push(data),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }

        let processed = !chunks.is_empty();
        for chunk in chunks {
            self.advance_bytes(&chunk);
        }

        if processed {
            self.events.push_back(SessionEvent::Output);
            if self.monitor.note_output(Instant::now()) {
                self.events.push_back(SessionEvent::Activity);
            }
        }

        // only a started session can have a child to report on
        let started = self.pty.is_some() || self.reader_thread.is_some();
        if started && (disconnected || !self.is_running()) {
            self.report_finished();
        } else if let Some(pty) = &mut self.pty {
            if let Some(code) = pty.try_wait() {
                self.running.store(false, Ordering::SeqCst);
                self.finish_with(Some(code));
            }
        }

        processed
    }

    /// Decode and interpret a chunk of raw child output.
    pub(crate) fn advance_bytes(&mut self, bytes: &[u8]) {
        // flow control bytes are consumed here, before decoding
        let stripped: Vec<u8>;
        let payload = if self.profile.flow_control
            && bytes.iter().any(|&b| b == XON || b == XOFF)
        {
            stripped = bytes
                .iter()
                .copied()
                .filter(|&b| {
                    match b {
                        XOFF => {
                            self.gate.suspend();
                            false
                        }
                        XON => {
                            let flush = self.gate.resume();
                            if !flush.is_empty() {
                                self.write_out(&flush);
                            }
                            false
                        }
                        _ => true,
                    }
                })
                .collect();
            &stripped[..]
        } else {
            bytes
        };

        let text = self.decoder.decode(payload);
        let mut responses = Vec::new();
        for ch in text.chars() {
            if let Some(response) = self.emulation.receive_char(ch, &mut self.screen) {
                responses.push(response);
            }
        }
        for response in responses {
            let bytes = response.to_bytes();
            self.write_out(&bytes);
        }

        for event in self.screen.take_events() {
            self.events.push_back(match event {
                TermEvent::Bell => SessionEvent::Bell,
                TermEvent::TitleChanged(title) => SessionEvent::TitleChanged(title),
            });
        }
    }

    /// Send raw bytes to the child, honoring flow control.
    pub fn send_bytes(&mut self, bytes: &[u8]) {
        match self.gate.submit(bytes) {
            Some(pass) => self.write_out(&pass),
            None => {
                if self.gate.backpressure_crossed() {
                    tracing::warn!("flow control queue exceeded threshold");
                    self.events.push_back(SessionEvent::FlowControlBackpressure);
                }
            }
        }
    }

    pub fn send_text(&mut self, text: &str) {
        self.send_bytes(text.as_bytes());
    }

    /// Send pasted text, wrapped in bracketed paste markers when the
    /// child has turned mode 2004 on.
    pub fn send_paste(&mut self, text: &str) {
        if self.screen.modes.bracketed_paste {
            let mut bytes = Vec::with_capacity(text.len() + 12);
            bytes.extend_from_slice(b"\x1b[200~");
            bytes.extend_from_slice(text.as_bytes());
            bytes.extend_from_slice(b"\x1b[201~");
            self.send_bytes(&bytes);
        } else {
            self.send_bytes(text.as_bytes());
        }
    }

    /// Encode a key event through the active key table and send it.
    pub fn send_key(&mut self, event: &crossterm::event::KeyEvent) {
        if let Some(bytes) = self.emulation.encode_key(event, &self.screen) {
            self.send_bytes(&bytes);
        }
    }

    pub fn set_key_table(&mut self, table: Arc<KeyTable>) {
        self.emulation.set_key_table(table);
    }

    fn write_out(&mut self, bytes: &[u8]) {
        let Some(writer) = &mut self.writer else {
            return;
        };
        if let Err(e) = writer.write_all(bytes).and_then(|_| writer.flush()) {
            tracing::warn!(error = %e, "pty write failed, closing session");
            self.writer = None;
            self.running.store(false, Ordering::SeqCst);
        }
    }

    /// Check the silence monitor. Call periodically from the driving loop.
    pub fn poll_monitor(&mut self) {
        if self.monitor.poll(Instant::now()) {
            self.events.push_back(SessionEvent::Silence);
        }
    }

    /// Swap the scrollback backend, discarding retained lines.
    pub fn set_history_type(&mut self, history: HistoryType) {
        self.screen.set_history_type(history);
        self.events.push_back(SessionEvent::HistoryReset);
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.screen.resize(cols, rows);
        if let Some(pty) = &self.pty {
            pty.resize(cols, rows)?;
        }
        Ok(())
    }

    /// Hang up the child's input, give it a grace period, then kill it.
    pub fn close(&mut self) {
        self.writer = None;
        if self.pty.is_none() {
            return;
        }

        let deadline = Instant::now() + CLOSE_GRACE;
        let code = loop {
            if let Some(code) = self.pty.as_mut().and_then(|p| p.try_wait()) {
                break Some(code);
            }
            if Instant::now() >= deadline {
                tracing::info!("child did not exit after hangup, killing");
                if let Some(pty) = &mut self.pty {
                    pty.kill();
                }
                break self.pty.as_mut().and_then(|p| p.try_wait());
            }
            thread::sleep(Duration::from_millis(10));
        };

        self.running.store(false, Ordering::SeqCst);
        self.finish_with(code);
    }

    fn report_finished(&mut self) {
        let code = self.pty.as_mut().and_then(|p| p.try_wait());
        self.finish_with(code);
    }

    fn finish_with(&mut self, code: Option<u32>) {
        if self.finished_reported {
            return;
        }
        self.finished_reported = true;
        tracing::info!(exit_code = ?code, "session finished");
        self.events.push_back(SessionEvent::Finished(code));
    }

    /// Pop the oldest queued event.
    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pty.as_ref().and_then(|p| p.process_id())
    }

    #[cfg(test)]
    fn set_test_writer(&mut self, writer: Box<dyn Write + Send>) {
        self.writer = Some(writer);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.writer = None;
        if let Some(pty) = &mut self.pty {
            pty.kill();
        }
        // the reader thread exits on its next read error; joining here
        // could block behind a read that never completes
        if let Some(handle) = self.reader_thread.take() {
            drop(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::KeyTableRegistry;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    fn init_logging() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn test_session(profile: Profile) -> Session {
        init_logging();
        let registry = KeyTableRegistry::with_builtins();
        let table = registry.get_or_default(&profile.key_table);
        Session::new(profile, 80, 24, table)
    }

    #[test]
    fn gate_passes_through_when_not_suspended() {
        let mut gate = FlowControlGate::new(true);
        assert_eq!(gate.submit(b"ls\r"), Some(b"ls\r".to_vec()));
        assert_eq!(gate.queued_len(), 0);
    }

    #[test]
    fn gate_queues_while_suspended_and_flushes_in_order() {
        let mut gate = FlowControlGate::new(true);
        gate.suspend();
        assert!(gate.is_suspended());
        assert_eq!(gate.submit(b"abc"), None);
        assert_eq!(gate.submit(b"def"), None);
        assert_eq!(gate.resume(), b"abcdef".to_vec());
        assert!(!gate.is_suspended());
    }

    #[test]
    fn gate_disabled_ignores_suspend() {
        let mut gate = FlowControlGate::new(false);
        gate.suspend();
        assert!(!gate.is_suspended());
        assert_eq!(gate.submit(b"x"), Some(b"x".to_vec()));
    }

    #[test]
    fn gate_reports_backpressure_once() {
        let mut gate = FlowControlGate::new(true);
        gate.suspend();
        let chunk = vec![0u8; BACKPRESSURE_THRESHOLD + 1];
        gate.submit(&chunk);
        assert!(gate.backpressure_crossed());
        gate.submit(b"more");
        assert!(!gate.backpressure_crossed());
        gate.resume();
        gate.suspend();
        let chunk = vec![0u8; BACKPRESSURE_THRESHOLD + 1];
        gate.submit(&chunk);
        assert!(gate.backpressure_crossed());
    }

    #[test]
    fn monitor_debounces_activity() {
        let mut profile = Profile::default();
        profile.monitor_activity = true;
        profile.activity_debounce_ms = 100;
        let start = Instant::now();
        let mut monitor = ActivityMonitor::new(&profile, start);

        assert!(monitor.note_output(start));
        assert!(!monitor.note_output(start + Duration::from_millis(50)));
        assert!(monitor.note_output(start + Duration::from_millis(200)));
    }

    #[test]
    fn monitor_silence_fires_once_and_rearms_on_output() {
        let mut profile = Profile::default();
        profile.monitor_silence = true;
        profile.silence_timeout_secs = 1;
        let start = Instant::now();
        let mut monitor = ActivityMonitor::new(&profile, start);

        assert!(!monitor.poll(start + Duration::from_millis(500)));
        assert!(monitor.poll(start + Duration::from_secs(2)));
        assert!(!monitor.poll(start + Duration::from_secs(3)));

        monitor.note_output(start + Duration::from_secs(4));
        assert!(monitor.poll(start + Duration::from_secs(6)));
    }

    #[test]
    fn decoder_handles_split_sequences() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo".as_bytes();
        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..]);
        assert_eq!(format!("{first}{second}"), "héllo");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn xoff_suspends_sends_and_xon_flushes() {
        let mut session = test_session(Profile::default());
        let buf = SharedBuf::default();
        session.set_test_writer(Box::new(buf.clone()));

        session.advance_bytes(b"output\x13");
        session.send_text("queued");
        assert_eq!(buf.contents(), b"");

        session.advance_bytes(b"\x11more");
        assert_eq!(buf.contents(), b"queued");
        assert_eq!(session.screen.line(0).unwrap().text(), "outputmore");
    }

    #[test]
    fn flow_control_disabled_passes_xoff_through() {
        let mut profile = Profile::default();
        profile.flow_control = false;
        let mut session = test_session(profile);
        let buf = SharedBuf::default();
        session.set_test_writer(Box::new(buf.clone()));

        session.advance_bytes(b"out\x13put");
        session.send_text("typed");
        assert_eq!(buf.contents(), b"typed");
    }

    #[test]
    fn paste_is_bracketed_only_when_requested() {
        let mut session = test_session(Profile::default());
        let buf = SharedBuf::default();
        session.set_test_writer(Box::new(buf.clone()));

        session.send_paste("plain");
        assert_eq!(buf.contents(), b"plain");

        session.advance_bytes(b"\x1b[?2004h");
        session.send_paste("wrapped");
        assert_eq!(
            &buf.contents()[5..],
            b"\x1b[200~wrapped\x1b[201~".as_slice()
        );
    }

    #[test]
    fn bell_and_title_become_session_events() {
        let mut session = test_session(Profile::default());
        session.advance_bytes(b"\x07\x1b]0;shell\x07");

        let mut events = Vec::new();
        while let Some(e) = session.next_event() {
            events.push(e);
        }
        assert!(events.contains(&SessionEvent::Bell));
        assert!(events.contains(&SessionEvent::TitleChanged("shell".into())));
    }

    #[test]
    fn unstarted_session_never_reports_exit() {
        let mut session = test_session(Profile::default());
        session.process_output();
        session.process_output();

        let mut events = Vec::new();
        while let Some(e) = session.next_event() {
            events.push(e);
        }
        assert!(
            !events.iter().any(|e| matches!(e, SessionEvent::Finished(_))),
            "no child was ever spawned, got {events:?}"
        );
    }

    #[test]
    fn history_swap_emits_reset_event() {
        let mut session = test_session(Profile::default());
        session.advance_bytes(b"data\r\n");
        session.set_history_type(HistoryType::Unbounded);
        let mut saw_reset = false;
        while let Some(e) = session.next_event() {
            if e == SessionEvent::HistoryReset {
                saw_reset = true;
            }
        }
        assert!(saw_reset);
        assert_eq!(session.screen.history_line_count(), 0);
    }

    #[test]
    fn dsr_response_is_written_back() {
        let mut session = test_session(Profile::default());
        let buf = SharedBuf::default();
        session.set_test_writer(Box::new(buf.clone()));

        session.advance_bytes(b"\x1b[6n");
        assert_eq!(buf.contents(), b"\x1b[1;1R");
    }
}
