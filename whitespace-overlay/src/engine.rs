//! Inline suggestion state machine.
//!
//! ```text
//!            qualifying edit                timer fires
//!   Idle ───────────────────► Debouncing ─────────────────► AwaitingPrediction
//!    ▲  ▲                        │  ▲ edit restarts timer          │
//!    │  └── focus lost / short ──┘  └──────────────────────────────┤
//!    │                                                             │ prediction ok,
//!    │  reject / accept all / consumed / remote edit               │ focus + cursor
//!    └──────────────────────────────────────────── Displaying ◄────┘ unchanged
//! ```
//!
//! The engine owns the editor buffer, cursor and focus flag, and is the only
//! place that touches the suggestion span. Events come in one at a time;
//! side effects leave as [`OverlayCommand`]s (timer, prediction request) and
//! as outgoing [`Delta`]s that must be sent to the hub in order.
//!
//! The buffer is the editor's view: the shared document plus, while
//! `Displaying`, the ghost span. Ghost text never leaves the engine. Outgoing
//! operations are expressed against the shared document (the buffer with the
//! span cut out), and suggestion text reaches peers only once it is kept, as
//! a plain insert.

use std::time::Duration;

use serde_json::{json, Value};
use whitespace_core::{utf16_len, Attributes, BufferError, Delta, DeltaOp, RichText};

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Text before the cursor needed to ask for a prediction (default: 5)
    pub min_chars: u32,
    /// Idle time after an edit before asking (default: 500ms)
    pub debounce: Duration,
    /// Trailing context sent with a request (default: 100)
    pub context_chars: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_chars: 5,
            debounce: Duration::from_millis(500),
            context_chars: 100,
        }
    }
}

impl OverlayConfig {
    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(20),
            ..Self::default()
        }
    }
}

/// Unconfirmed ghost text in the buffer, in UTF-16 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestionSpan {
    pub start: u32,
    pub length: u32,
}

impl SuggestionSpan {
    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    /// Closed range check: the position right after the ghost text counts.
    fn touches(&self, index: u32) -> bool {
        index >= self.start && index <= self.end()
    }

    /// Units of `[from, from + len)` that fall inside the span.
    fn overlap(&self, from: u32, len: u32) -> u32 {
        let lo = from.max(self.start);
        let hi = from.saturating_add(len).min(self.end());
        hi.saturating_sub(lo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Idle,
    Debouncing { generation: u64 },
    AwaitingPrediction { request_id: u64, cursor: u32 },
    Displaying(SuggestionSpan),
}

/// Editor gestures the overlay reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGesture {
    /// Tab: confirm the whole suggestion.
    AcceptAll,
    /// Ctrl+ArrowRight: confirm up to and including the next space.
    AcceptWord,
    /// Escape: drop the suggestion.
    Reject,
    /// Backspace or Delete with the cursor touching the suggestion removes
    /// it; the key press itself is consumed.
    Backspace,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    /// The user changed the text, in buffer positions.
    LocalEdit(Delta),
    /// Another editor's operation relayed by the hub.
    RemoteChange(Delta),
    Key(KeyGesture),
    /// Cursor placed by arrow keys or a pointer click.
    CursorMoved(u32),
    Focus(bool),
    DebounceElapsed { generation: u64 },
    Prediction { request_id: u64, result: Result<String, String> },
}

/// Side effects requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayCommand {
    StartTimer { delay: Duration, generation: u64 },
    CancelTimer,
    RequestPrediction { request_id: u64, context: String },
}

/// Formatting of ghost text.
pub fn suggestion_attributes() -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("color".into(), json!("#aaaaaa"));
    attributes.insert("user-suggestion".into(), json!(true));
    attributes.insert("non-editable".into(), json!(true));
    attributes
}

/// Formatting change that turns kept ghost text into ordinary text, matching
/// the plain insert peers receive.
pub fn confirmed_attributes() -> Attributes {
    suggestion_attributes()
        .into_iter()
        .map(|(key, _)| (key, Value::Null))
        .collect()
}

pub struct SuggestionEngine {
    config: OverlayConfig,
    buffer: RichText,
    cursor: u32,
    focused: bool,
    state: OverlayState,
    generation: u64,
    next_request_id: u64,
    outgoing: Vec<Delta>,
}

impl SuggestionEngine {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            buffer: RichText::new(),
            cursor: 0,
            focused: true,
            state: OverlayState::Idle,
            generation: 0,
            next_request_id: 0,
            outgoing: Vec::new(),
        }
    }

    /// Replace the content with a snapshot from the hub. Resets the overlay.
    pub fn load(&mut self, snapshot: &Delta) -> Result<(), BufferError> {
        self.buffer.load(snapshot)?;
        self.cursor = self.cursor.min(self.buffer.len());
        self.state = OverlayState::Idle;
        self.outgoing.clear();
        Ok(())
    }

    /// Process one event. Outgoing operations accumulate until
    /// [`take_outgoing`](Self::take_outgoing).
    pub fn handle(&mut self, event: OverlayEvent) -> Vec<OverlayCommand> {
        match event {
            OverlayEvent::LocalEdit(delta) => self.on_local_edit(delta),
            OverlayEvent::RemoteChange(delta) => self.on_remote_change(delta),
            OverlayEvent::Key(key) => {
                self.on_key(key);
                Vec::new()
            }
            OverlayEvent::CursorMoved(index) => {
                self.on_cursor_moved(index);
                Vec::new()
            }
            OverlayEvent::Focus(focused) => self.on_focus(focused),
            OverlayEvent::DebounceElapsed { generation } => self.on_debounce_elapsed(generation),
            OverlayEvent::Prediction { request_id, result } => {
                self.on_prediction(request_id, result);
                Vec::new()
            }
        }
    }

    /// Operations to send to the hub, oldest first, against the shared
    /// document.
    pub fn take_outgoing(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn suggestion(&self) -> Option<SuggestionSpan> {
        match self.state {
            OverlayState::Displaying(span) => Some(span),
            _ => None,
        }
    }

    /// True while a prediction request is outstanding.
    pub fn is_predicting(&self) -> bool {
        matches!(self.state, OverlayState::AwaitingPrediction { .. })
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn buffer(&self) -> &RichText {
        &self.buffer
    }

    /// Text as the editor shows it, ghost text included.
    pub fn text(&self) -> String {
        self.buffer.text()
    }

    /// Text of the shared document, i.e. without the ghost text.
    pub fn shared_text(&self) -> String {
        match self.suggestion() {
            Some(span) => {
                let len = self.buffer.len();
                self.buffer.text_range(0, span.start) + &self.buffer.text_range(span.end(), len - span.end())
            }
            None => self.text(),
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    // ─── Edits ────────────────────────────────────────────────────────

    fn on_local_edit(&mut self, delta: Delta) -> Vec<OverlayCommand> {
        if let Err(e) = self.buffer.apply(&delta) {
            log::warn!("Local edit did not apply cleanly: {e}");
        }
        self.cursor = delta.transform_position(self.cursor);

        match self.state {
            OverlayState::Displaying(span) => {
                self.reconcile(span, &delta);
                Vec::new()
            }
            _ => {
                self.outgoing.push(delta);
                self.restart_debounce()
            }
        }
    }

    /// Share a local edit made while ghost text is shown, and keep, shrink or
    /// drop the span.
    fn reconcile(&mut self, span: SuggestionSpan, delta: &Delta) {
        match delta.as_typed_insert() {
            // Typing at the start consumes as many ghost characters.
            Some((index, typed)) if index == span.start => {
                let typed_len = utf16_len(typed);
                self.outgoing.push(without_span(delta, span));
                let ghost_start = index + typed_len;
                let consumed = typed_len.min(span.length);
                self.delete_local(ghost_start, consumed);
                let remaining = span.length - consumed;
                self.state = if remaining == 0 {
                    OverlayState::Idle
                } else {
                    OverlayState::Displaying(SuggestionSpan { start: ghost_start, length: remaining })
                };
            }
            // Typing inside keeps the ghost text before the insertion; the
            // tail stays a suggestion.
            Some((index, typed)) if index > span.start && index < span.end() => {
                let typed_len = utf16_len(typed);
                self.keep(span.start, index - span.start);
                let tail = SuggestionSpan { start: index, length: span.end() - index };
                self.outgoing.push(without_span(delta, tail));
                self.state = OverlayState::Displaying(SuggestionSpan {
                    start: index + typed_len,
                    length: tail.length,
                });
            }
            _ => {
                self.outgoing.push(without_span(delta, span));
                self.remove_surviving(span, delta);
                self.state = OverlayState::Idle;
            }
        }
    }

    fn on_remote_change(&mut self, delta: Delta) -> Vec<OverlayCommand> {
        // Remote positions address the shared document: drop the ghost text
        // first so the buffer matches it.
        if let OverlayState::Displaying(span) = self.state {
            log::debug!("Remote change invalidated the suggestion at {}", span.start);
            self.delete_local(span.start, span.length);
            self.state = OverlayState::Idle;
        }

        if let Err(e) = self.buffer.apply(&delta) {
            log::warn!("Remote change did not apply cleanly: {e}");
        }
        self.cursor = delta.transform_position(self.cursor);
        Vec::new()
    }

    fn restart_debounce(&mut self) -> Vec<OverlayCommand> {
        let mut commands = Vec::new();
        if matches!(self.state, OverlayState::Debouncing { .. }) {
            commands.push(OverlayCommand::CancelTimer);
        }
        if self.cursor < self.config.min_chars || !self.focused {
            self.state = OverlayState::Idle;
            return commands;
        }
        self.generation += 1;
        self.state = OverlayState::Debouncing { generation: self.generation };
        commands.push(OverlayCommand::StartTimer {
            delay: self.config.debounce,
            generation: self.generation,
        });
        commands
    }

    // ─── Prediction ───────────────────────────────────────────────────

    fn on_debounce_elapsed(&mut self, generation: u64) -> Vec<OverlayCommand> {
        if self.state != (OverlayState::Debouncing { generation }) {
            log::trace!("Ignoring stale debounce timer {generation}");
            return Vec::new();
        }
        if !self.focused {
            self.state = OverlayState::Idle;
            return Vec::new();
        }

        let context = context_before(&self.text(), self.cursor, self.config.context_chars);
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.state = OverlayState::AwaitingPrediction { request_id, cursor: self.cursor };
        vec![OverlayCommand::RequestPrediction { request_id, context }]
    }

    fn on_prediction(&mut self, request_id: u64, result: Result<String, String>) {
        let OverlayState::AwaitingPrediction { request_id: awaiting, cursor } = self.state else {
            log::trace!("Dropping prediction {request_id}: not awaiting one");
            return;
        };
        if awaiting != request_id {
            log::trace!("Dropping stale prediction {request_id}, awaiting {awaiting}");
            return;
        }
        self.state = OverlayState::Idle;

        let prediction = match result {
            Ok(prediction) if !prediction.is_empty() => prediction,
            Ok(_) => return,
            Err(e) => {
                log::debug!("Prediction {request_id} failed: {e}");
                return;
            }
        };
        if !self.focused || self.cursor != cursor {
            log::debug!("Discarding prediction {request_id}: focus or cursor changed");
            return;
        }

        // Local only: peers never see unconfirmed text.
        match self
            .buffer
            .insert_with_attributes(cursor, &prediction, suggestion_attributes())
        {
            Ok(_) => {
                self.state = OverlayState::Displaying(SuggestionSpan {
                    start: cursor,
                    length: utf16_len(&prediction),
                });
            }
            Err(e) => log::warn!("Could not insert suggestion: {e}"),
        }
    }

    // ─── Gestures ─────────────────────────────────────────────────────

    fn on_key(&mut self, key: KeyGesture) {
        let OverlayState::Displaying(span) = self.state else {
            return;
        };
        match key {
            KeyGesture::AcceptAll => {
                self.keep(span.start, span.length);
                self.cursor = span.end();
                self.state = OverlayState::Idle;
            }
            KeyGesture::AcceptWord => {
                let ghost = self.buffer.text_range(span.start, span.length);
                let word_len = match ghost.find(' ') {
                    Some(space) => utf16_len(&ghost[..=space]),
                    None => span.length,
                };
                self.keep(span.start, word_len);
                self.cursor = span.start + word_len;
                self.state = if word_len < span.length {
                    OverlayState::Displaying(SuggestionSpan {
                        start: span.start + word_len,
                        length: span.length - word_len,
                    })
                } else {
                    OverlayState::Idle
                };
            }
            KeyGesture::Reject => {
                self.delete_local(span.start, span.length);
                self.state = OverlayState::Idle;
            }
            KeyGesture::Backspace | KeyGesture::Delete => {
                if span.touches(self.cursor) {
                    self.delete_local(span.start, span.length);
                    self.state = OverlayState::Idle;
                }
            }
        }
    }

    fn on_cursor_moved(&mut self, index: u32) {
        let index = index.min(self.buffer.len());
        self.cursor = match self.state {
            OverlayState::Displaying(span) if span.touches(index) => span.start,
            _ => index,
        };
    }

    fn on_focus(&mut self, focused: bool) -> Vec<OverlayCommand> {
        self.focused = focused;
        if !focused && matches!(self.state, OverlayState::Debouncing { .. }) {
            self.state = OverlayState::Idle;
            return vec![OverlayCommand::CancelTimer];
        }
        Vec::new()
    }

    // ─── Buffer helpers ───────────────────────────────────────────────

    /// Turn the ghost text at the front of the span into shared content.
    /// `index` is the span start, so it is the same position in both views.
    fn keep(&mut self, index: u32, len: u32) {
        if len == 0 {
            return;
        }
        let text = self.buffer.text_range(index, len);
        match self.buffer.format(index, len, confirmed_attributes()) {
            Ok(_) => self.outgoing.push(Delta::new().retain(index).insert(text)),
            Err(e) => log::warn!("Could not confirm suggestion text: {e}"),
        }
    }

    /// Remove ghost text from the buffer. Nothing is sent.
    fn delete_local(&mut self, index: u32, len: u32) {
        if len == 0 {
            return;
        }
        match self.buffer.delete(index, len) {
            Ok(delta) => self.cursor = delta.transform_position(self.cursor),
            Err(e) => log::warn!("Could not remove suggestion text: {e}"),
        }
    }

    /// Delete whatever is left of `span` after `delta` was applied.
    fn remove_surviving(&mut self, span: SuggestionSpan, delta: &Delta) {
        for (start, len) in surviving_ranges(delta, span).into_iter().rev() {
            self.delete_local(start, len);
        }
    }
}

/// Rewrite a buffer-position operation for the shared document, where the
/// characters of `span` do not exist. Inserts are kept whole; retains and
/// deletes lose the part covering the span.
fn without_span(delta: &Delta, span: SuggestionSpan) -> Delta {
    let mut shared = Delta::new();
    let mut old = 0u32;
    for op in &delta.ops {
        match op {
            DeltaOp::Insert { .. } => shared.push(op.clone()),
            DeltaOp::Retain { retain, attributes } => {
                shared.push(DeltaOp::Retain {
                    retain: retain - span.overlap(old, *retain),
                    attributes: attributes.clone(),
                });
                old += retain;
            }
            DeltaOp::Delete { delete } => {
                shared.push(DeltaOp::Delete { delete: delete - span.overlap(old, *delete) });
                old += delete;
            }
        }
    }
    shared
}

/// Where the characters of `span` ended up after `delta`, as
/// post-change `(start, len)` ranges in ascending order.
fn surviving_ranges(delta: &Delta, span: SuggestionSpan) -> Vec<(u32, u32)> {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    let mut keep = |old: u32, new: u32, len: u32| {
        let from = old.max(span.start);
        let to = old.saturating_add(len).min(span.end());
        if from < to {
            let start = new + (from - old);
            match ranges.last_mut() {
                Some((last_start, last_len)) if *last_start + *last_len == start => {
                    *last_len += to - from;
                }
                _ => ranges.push((start, to - from)),
            }
        }
    };

    let (mut old, mut new) = (0u32, 0u32);
    for op in &delta.ops {
        match op {
            DeltaOp::Retain { retain, .. } => {
                keep(old, new, *retain);
                old += retain;
                new += retain;
            }
            DeltaOp::Insert { .. } => new += op.len(),
            DeltaOp::Delete { delete } => old += delete,
        }
    }
    // Implicit retain of the rest of the document.
    keep(old, new, u32::MAX - old);
    ranges
}

/// Up to `max` UTF-16 units of `text` ending at `cursor`, never starting in
/// the middle of a surrogate pair.
fn context_before(text: &str, cursor: u32, max: u32) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = (cursor as usize).min(units.len());
    let mut start = end.saturating_sub(max as usize);
    if start < end && (0xDC00..=0xDFFF).contains(&units[start]) {
        start += 1;
    }
    String::from_utf16_lossy(&units[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine holding `text`, focused, cursor at the end.
    fn engine_with(text: &str) -> SuggestionEngine {
        let mut engine = SuggestionEngine::new(OverlayConfig::default());
        engine.handle(OverlayEvent::LocalEdit(Delta::new().insert(text)));
        engine.take_outgoing();
        engine
    }

    /// Run the timer and prediction for the current debounce.
    fn predict(engine: &mut SuggestionEngine, prediction: &str) {
        let OverlayState::Debouncing { generation } = engine.state() else {
            panic!("expected Debouncing, got {:?}", engine.state());
        };
        let commands = engine.handle(OverlayEvent::DebounceElapsed { generation });
        let [OverlayCommand::RequestPrediction { request_id, .. }] = commands.as_slice() else {
            panic!("expected a request, got {commands:?}");
        };
        engine.handle(OverlayEvent::Prediction {
            request_id: *request_id,
            result: Ok(prediction.to_string()),
        });
    }

    fn displaying(text: &str, prediction: &str) -> SuggestionEngine {
        let mut engine = engine_with(text);
        predict(&mut engine, prediction);
        engine
    }

    fn is_ghost(engine: &SuggestionEngine, index: u32) -> bool {
        engine.buffer().attributes_at(index).get("user-suggestion") == Some(&Value::Bool(true))
    }

    /// The span covers exactly the ghost-formatted characters.
    fn assert_span_exact(engine: &SuggestionEngine) {
        let len = engine.buffer().len();
        let span = engine.suggestion();
        for i in 0..len {
            let inside = span.is_some_and(|s| i >= s.start && i < s.end());
            assert_eq!(is_ghost(engine, i), inside, "char {i} in {:?}", engine.text());
        }
    }

    /// What the hub holds after replaying the engine's outgoing operations
    /// on top of `base`.
    fn replay(base: &str, engine: &mut SuggestionEngine) -> RichText {
        let hub = RichText::from_snapshot(&Delta::new().insert(base)).unwrap();
        for delta in engine.take_outgoing() {
            hub.apply(&delta).unwrap();
        }
        hub
    }

    fn has_ghost_text(snapshot: &Delta) -> bool {
        snapshot.ops.iter().any(|op| {
            op.attributes()
                .is_some_and(|attrs| attrs.get("user-suggestion") == Some(&Value::Bool(true)))
        })
    }

    #[test]
    fn test_short_text_does_not_debounce() {
        let mut engine = SuggestionEngine::new(OverlayConfig::default());
        let commands = engine.handle(OverlayEvent::LocalEdit(Delta::new().insert("Hey")));
        assert!(commands.is_empty());
        assert_eq!(engine.state(), OverlayState::Idle);
    }

    #[test]
    fn test_qualifying_edit_starts_debounce() {
        let mut engine = SuggestionEngine::new(OverlayConfig::default());
        let commands = engine.handle(OverlayEvent::LocalEdit(Delta::new().insert("Hello")));
        assert_eq!(
            commands,
            vec![OverlayCommand::StartTimer { delay: Duration::from_millis(500), generation: 1 }]
        );
        assert_eq!(engine.state(), OverlayState::Debouncing { generation: 1 });
        assert_eq!(engine.take_outgoing(), vec![Delta::new().insert("Hello")]);
    }

    #[test]
    fn test_edit_restarts_debounce_and_old_timer_is_stale() {
        let mut engine = engine_with("Hello");
        let commands = engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(5).insert("!")));
        assert_eq!(commands[0], OverlayCommand::CancelTimer);
        assert_eq!(engine.state(), OverlayState::Debouncing { generation: 2 });

        assert!(engine.handle(OverlayEvent::DebounceElapsed { generation: 1 }).is_empty());
        assert_eq!(engine.state(), OverlayState::Debouncing { generation: 2 });
    }

    #[test]
    fn test_request_uses_trailing_context() {
        let mut engine = SuggestionEngine::new(OverlayConfig::default());
        let text = "a".repeat(150) + "tail";
        engine.handle(OverlayEvent::LocalEdit(Delta::new().insert(text.clone())));
        let commands = engine.handle(OverlayEvent::DebounceElapsed { generation: 1 });
        let [OverlayCommand::RequestPrediction { context, .. }] = commands.as_slice() else {
            panic!("expected a request");
        };
        assert_eq!(context.len(), 100);
        assert!(text.ends_with(context.as_str()));
        assert!(engine.is_predicting());
    }

    #[test]
    fn test_context_does_not_split_surrogate_pairs() {
        let mut engine = SuggestionEngine::new(OverlayConfig::default());
        // 121 units: a cut 100 units back lands on the low half of a pair.
        let text = "😀".repeat(60) + "a";
        engine.handle(OverlayEvent::LocalEdit(Delta::new().insert(text)));
        let commands = engine.handle(OverlayEvent::DebounceElapsed { generation: 1 });
        let [OverlayCommand::RequestPrediction { context, .. }] = commands.as_slice() else {
            panic!("expected a request");
        };
        assert!(!context.contains('\u{FFFD}'));
        assert_eq!(*context, "😀".repeat(49) + "a");
    }

    #[test]
    fn test_example_two_type_through_then_accept_all() {
        let mut engine = engine_with("Hello");
        predict(&mut engine, " world");
        assert_eq!(engine.text(), "Hello world");
        assert_eq!(engine.shared_text(), "Hello");
        assert_eq!(engine.suggestion(), Some(SuggestionSpan { start: 5, length: 6 }));
        assert_eq!(engine.cursor(), 5);
        assert_span_exact(&engine);
        assert!(engine.take_outgoing().is_empty());

        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(5).insert("X")));
        assert_eq!(engine.suggestion(), Some(SuggestionSpan { start: 6, length: 5 }));
        assert_eq!(engine.text(), "HelloXworld");
        assert_eq!(engine.cursor(), 6);
        assert_span_exact(&engine);
        assert_eq!(engine.take_outgoing(), vec![Delta::new().retain(5).insert("X")]);

        engine.handle(OverlayEvent::Key(KeyGesture::AcceptAll));
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.cursor(), 11);
        assert!(engine.buffer().attributes_at(10).is_empty());
        assert_span_exact(&engine);
        assert_eq!(engine.take_outgoing(), vec![Delta::new().retain(6).insert("world")]);
    }

    #[test]
    fn test_example_three_click_inside_redirects() {
        let mut engine = displaying("Hello", " world");
        engine.handle(OverlayEvent::CursorMoved(7));
        assert_eq!(engine.cursor(), 5);
        assert_eq!(engine.suggestion(), Some(SuggestionSpan { start: 5, length: 6 }));

        // Right after the ghost text also redirects; before it does not.
        engine.handle(OverlayEvent::CursorMoved(11));
        assert_eq!(engine.cursor(), 5);
        engine.handle(OverlayEvent::CursorMoved(2));
        assert_eq!(engine.cursor(), 2);
    }

    #[test]
    fn test_ghost_text_never_reaches_the_hub() {
        let mut engine = displaying("Hello", " world");
        let hub = replay("Hello", &mut engine);
        assert_eq!(hub.text(), "Hello");

        // The editor goes away while the suggestion is up.
        drop(engine);
        assert_eq!(hub.snapshot(), Delta::new().insert("Hello"));
        assert!(!has_ghost_text(&hub.snapshot()));
    }

    #[test]
    fn test_hub_tracks_shared_text_through_every_gesture() {
        let mut engine = displaying("Hello", " big world");
        let hub = replay("Hello", &mut engine);

        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(5).insert("X")));
        assert_eq!(engine.text(), "HelloXbig world");
        engine.handle(OverlayEvent::Key(KeyGesture::AcceptWord));
        assert_eq!(engine.suggestion(), Some(SuggestionSpan { start: 10, length: 5 }));
        for delta in engine.take_outgoing() {
            hub.apply(&delta).unwrap();
        }
        assert_eq!(hub.text(), engine.shared_text());
        assert_eq!(hub.text(), "HelloXbig ");
        assert!(!has_ghost_text(&hub.snapshot()));

        engine.handle(OverlayEvent::Key(KeyGesture::Reject));
        assert_eq!(engine.text(), "HelloXbig ");
        assert!(engine.take_outgoing().is_empty());
        assert_eq!(hub.snapshot(), engine.buffer().snapshot());
    }

    #[test]
    fn test_typing_consumes_whole_suggestion() {
        let mut engine = displaying("Hello", "!!");
        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(5).insert("abc")));
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Helloabc");
        assert_span_exact(&engine);
        assert_eq!(replay("Hello", &mut engine).text(), "Helloabc");
    }

    #[test]
    fn test_typing_inside_keeps_tail() {
        let mut engine = displaying("Hello", " big world");
        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(9).insert("!")));
        assert_eq!(engine.text(), "Hello big! world");
        assert_eq!(engine.suggestion(), Some(SuggestionSpan { start: 10, length: 6 }));
        assert_span_exact(&engine);

        let hub = replay("Hello", &mut engine);
        assert_eq!(hub.text(), "Hello big!");
        assert_eq!(hub.text(), engine.shared_text());
    }

    #[test]
    fn test_other_edit_rejects() {
        let mut engine = displaying("Hello there", " friend");
        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(1).delete(2)));
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Hlo there");
        assert_span_exact(&engine);
        assert_eq!(engine.take_outgoing(), vec![Delta::new().retain(1).delete(2)]);
    }

    #[test]
    fn test_typing_right_after_suggestion_rejects_it() {
        let mut engine = displaying("Hello", " world");
        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(11).insert("?")));
        assert_eq!(engine.text(), "Hello?");
        assert_eq!(engine.state(), OverlayState::Idle);
        // Sent at the shared position, where the ghost text never was.
        assert_eq!(engine.take_outgoing(), vec![Delta::new().retain(5).insert("?")]);
    }

    #[test]
    fn test_edit_across_span_drops_ghost_part_of_delete() {
        let mut engine = displaying("Hello", " world");
        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(3).delete(5)));
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Hel");
        assert_eq!(engine.take_outgoing(), vec![Delta::new().retain(3).delete(2)]);
    }

    #[test]
    fn test_accept_word_steps_through_words() {
        let mut engine = displaying("Hello", "big wide world");
        engine.handle(OverlayEvent::Key(KeyGesture::AcceptWord));
        assert_eq!(engine.suggestion(), Some(SuggestionSpan { start: 9, length: 10 }));
        assert_eq!(engine.cursor(), 9);
        assert_span_exact(&engine);

        engine.handle(OverlayEvent::Key(KeyGesture::AcceptWord));
        engine.handle(OverlayEvent::Key(KeyGesture::AcceptWord));
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.cursor(), 19);
        assert_eq!(engine.text(), "Hellobig wide world");
        assert_span_exact(&engine);
        assert_eq!(
            engine.take_outgoing(),
            vec![
                Delta::new().retain(5).insert("big "),
                Delta::new().retain(9).insert("wide "),
                Delta::new().retain(14).insert("world"),
            ]
        );
    }

    #[test]
    fn test_reject_restores_text() {
        let mut engine = displaying("Hello", " world");
        engine.handle(OverlayEvent::Key(KeyGesture::Reject));
        assert_eq!(engine.text(), "Hello");
        assert_eq!(engine.state(), OverlayState::Idle);
        assert!(engine.take_outgoing().is_empty());
    }

    #[test]
    fn test_backspace_in_span_rejects() {
        let mut engine = displaying("Hello", " world");
        engine.handle(OverlayEvent::Key(KeyGesture::Backspace));
        assert_eq!(engine.text(), "Hello");
        assert_eq!(engine.state(), OverlayState::Idle);
    }

    #[test]
    fn test_keys_without_suggestion_do_nothing() {
        let mut engine = engine_with("Hello");
        engine.handle(OverlayEvent::Key(KeyGesture::AcceptAll));
        assert_eq!(engine.text(), "Hello");
        assert!(matches!(engine.state(), OverlayState::Debouncing { .. }));
    }

    #[test]
    fn test_remote_change_invalidates_suggestion() {
        let mut engine = displaying("Hello", " world");
        engine.handle(OverlayEvent::RemoteChange(Delta::new().insert(">> ")));
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), ">> Hello");
        assert_eq!(engine.cursor(), 8);
        assert!(engine.take_outgoing().is_empty());
    }

    #[test]
    fn test_remote_change_after_span_lands_in_shared_position() {
        let mut engine = displaying("Hello", " world");
        // Appended by a peer at the end of its (ghost-free) copy.
        engine.handle(OverlayEvent::RemoteChange(Delta::new().retain(5).insert("!")));
        assert_eq!(engine.text(), "Hello!");
        assert_eq!(engine.cursor(), 6);
    }

    #[test]
    fn test_remote_change_while_awaiting_moves_cursor_and_discards() {
        let mut engine = engine_with("Hello");
        let commands = engine.handle(OverlayEvent::DebounceElapsed { generation: 1 });
        let [OverlayCommand::RequestPrediction { request_id, .. }] = commands.as_slice() else {
            panic!("expected a request");
        };
        let request_id = *request_id;

        engine.handle(OverlayEvent::RemoteChange(Delta::new().insert("Oh, ")));
        assert!(engine.is_predicting());

        engine.handle(OverlayEvent::Prediction { request_id, result: Ok(" world".into()) });
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Oh, Hello");
    }

    #[test]
    fn test_stale_prediction_is_ignored() {
        let mut engine = engine_with("Hello");
        engine.handle(OverlayEvent::DebounceElapsed { generation: 1 });
        engine.handle(OverlayEvent::Prediction { request_id: 99, result: Ok("nope".into()) });
        assert!(engine.is_predicting());
        assert_eq!(engine.text(), "Hello");
    }

    #[test]
    fn test_failed_or_empty_prediction_goes_idle() {
        let mut engine = engine_with("Hello");
        engine.handle(OverlayEvent::DebounceElapsed { generation: 1 });
        engine.handle(OverlayEvent::Prediction { request_id: 1, result: Err("503".into()) });
        assert_eq!(engine.state(), OverlayState::Idle);

        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(5).insert("!")));
        engine.handle(OverlayEvent::DebounceElapsed { generation: 2 });
        engine.handle(OverlayEvent::Prediction { request_id: 2, result: Ok(String::new()) });
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Hello!");
    }

    #[test]
    fn test_focus_loss_cancels_debounce_and_blocks_display() {
        let mut engine = engine_with("Hello");
        assert_eq!(engine.handle(OverlayEvent::Focus(false)), vec![OverlayCommand::CancelTimer]);
        assert_eq!(engine.state(), OverlayState::Idle);

        engine.handle(OverlayEvent::Focus(true));
        engine.handle(OverlayEvent::LocalEdit(Delta::new().retain(5).insert("!")));
        let OverlayState::Debouncing { generation } = engine.state() else {
            panic!("expected Debouncing");
        };
        engine.handle(OverlayEvent::DebounceElapsed { generation });
        engine.handle(OverlayEvent::Focus(false));
        engine.handle(OverlayEvent::Prediction { request_id: 1, result: Ok(" there".into()) });
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Hello!");
    }

    #[test]
    fn test_cursor_move_while_awaiting_discards() {
        let mut engine = engine_with("Hello");
        engine.handle(OverlayEvent::DebounceElapsed { generation: 1 });
        engine.handle(OverlayEvent::CursorMoved(2));
        engine.handle(OverlayEvent::Prediction { request_id: 1, result: Ok(" world".into()) });
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Hello");
    }

    #[test]
    fn test_surviving_ranges_rejoin_after_delete() {
        let span = SuggestionSpan { start: 5, length: 6 };
        // Insert before the span, delete two of its characters.
        let delta = Delta::new().insert("ab").retain(7).delete(2);
        assert_eq!(surviving_ranges(&delta, span), vec![(7, 4)]);
    }

    #[test]
    fn test_surviving_ranges_with_insert_inside() {
        let span = SuggestionSpan { start: 5, length: 6 };
        let delta = Delta::new().retain(7).delete(1).insert("zz");
        assert_eq!(surviving_ranges(&delta, span), vec![(5, 2), (9, 3)]);
    }

    #[test]
    fn test_without_span_keeps_inserts_inside_span() {
        let span = SuggestionSpan { start: 5, length: 6 };
        let delta = Delta::new().retain(7).delete(1).insert("zz").retain(5).delete(1);
        // Old positions 0..5 stay, 5..11 vanish, 11.. shift left by 6.
        assert_eq!(
            without_span(&delta, span),
            Delta::new().retain(5).insert("zz").retain(2).delete(1)
        );
    }

    #[test]
    fn test_load_resets_overlay() {
        let mut engine = displaying("Hello", " world");
        engine.load(&Delta::new().insert("Fresh")).unwrap();
        assert_eq!(engine.state(), OverlayState::Idle);
        assert_eq!(engine.text(), "Fresh");
        assert!(engine.take_outgoing().is_empty());
    }
}
