//! Async driver for [`SuggestionEngine`].
//!
//! Every input (editor edits, keys, clicks, focus, remote operations, timer
//! expiry and prediction results) goes through one bounded queue, so the
//! engine sees events strictly one at a time. The driver runs the commands
//! the engine returns: it owns the debounce timer and at most one in-flight
//! prediction task.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use whitespace_core::Delta;

use crate::engine::{OverlayCommand, OverlayEvent, SuggestionEngine, SuggestionSpan};
use crate::predict::Predictor;
use crate::timer::DebounceTimer;

const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Overlay driver has stopped")]
pub struct DriverClosed;

/// What the editor needs to render around the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayStatus {
    /// Show the "Thinking..." indicator.
    pub predicting: bool,
    pub suggestion: Option<SuggestionSpan>,
    pub cursor: u32,
}

impl OverlayStatus {
    fn of(engine: &SuggestionEngine) -> Self {
        Self {
            predicting: engine.is_predicting(),
            suggestion: engine.suggestion(),
            cursor: engine.cursor(),
        }
    }
}

/// Cloneable input side of a running driver. The driver stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct OverlayHandle {
    events: mpsc::Sender<OverlayEvent>,
    status: watch::Receiver<OverlayStatus>,
}

impl OverlayHandle {
    pub async fn send(&self, event: OverlayEvent) -> Result<(), DriverClosed> {
        self.events.send(event).await.map_err(|_| DriverClosed)
    }

    pub fn status(&self) -> OverlayStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<OverlayStatus> {
        self.status.clone()
    }
}

pub struct OverlayDriver {
    engine: SuggestionEngine,
    predictor: Arc<dyn Predictor>,
    events: mpsc::Receiver<OverlayEvent>,
    // Weak so that timer and prediction tasks never keep the queue open.
    loopback: mpsc::WeakSender<OverlayEvent>,
    outgoing: mpsc::Sender<Delta>,
    status: watch::Sender<OverlayStatus>,
    timer: DebounceTimer,
    in_flight: Option<JoinHandle<()>>,
}

impl OverlayDriver {
    /// `outgoing` receives the operations to send to the hub, in order. Ghost
    /// text is never among them.
    pub fn new(
        engine: SuggestionEngine,
        predictor: Arc<dyn Predictor>,
        outgoing: mpsc::Sender<Delta>,
    ) -> (Self, OverlayHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(OverlayStatus::of(&engine));
        let driver = Self {
            engine,
            predictor,
            events: events_rx,
            loopback: events_tx.downgrade(),
            outgoing,
            status: status_tx,
            timer: DebounceTimer::new(),
            in_flight: None,
        };
        let handle = OverlayHandle {
            events: events_tx,
            status: status_rx,
        };
        (driver, handle)
    }

    /// Start the driver on the current runtime. The task yields the engine
    /// back when it stops.
    pub fn spawn(
        engine: SuggestionEngine,
        predictor: Arc<dyn Predictor>,
        outgoing: mpsc::Sender<Delta>,
    ) -> (OverlayHandle, JoinHandle<SuggestionEngine>) {
        let (driver, handle) = Self::new(engine, predictor, outgoing);
        (handle, tokio::spawn(driver.run()))
    }

    pub async fn run(mut self) -> SuggestionEngine {
        log::debug!("Overlay driver started");
        while let Some(event) = self.events.recv().await {
            self.step(event).await;
        }
        self.timer.cancel();
        self.abort_prediction();
        log::debug!("Overlay driver stopped");
        self.engine
    }

    async fn step(&mut self, event: OverlayEvent) {
        log::trace!("Overlay event: {event:?}");
        for command in self.engine.handle(event) {
            match command {
                OverlayCommand::StartTimer { delay, generation } => {
                    self.timer.start(delay, generation, self.loopback.clone());
                }
                OverlayCommand::CancelTimer => self.timer.cancel(),
                OverlayCommand::RequestPrediction { request_id, context } => {
                    self.request_prediction(request_id, context);
                }
            }
        }
        // A result the engine would discard is not worth waiting for.
        if !self.engine.is_predicting() {
            self.abort_prediction();
        }

        for delta in self.engine.take_outgoing() {
            if self.outgoing.send(delta).await.is_err() {
                log::warn!("Outgoing channel closed, local operation not sent");
            }
        }

        let next = OverlayStatus::of(&self.engine);
        self.status.send_if_modified(|status| {
            let changed = *status != next;
            *status = next;
            changed
        });
    }

    fn request_prediction(&mut self, request_id: u64, context: String) {
        self.abort_prediction();
        let predictor = self.predictor.clone();
        let events = self.loopback.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = predictor.predict(context).await.map_err(|e| e.to_string());
            if let Some(events) = events.upgrade() {
                let _ = events.send(OverlayEvent::Prediction { request_id, result }).await;
            }
        }));
    }

    fn abort_prediction(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }
}
