//! # whitespace-overlay: inline suggestions for a collaborative editor
//!
//! - [`engine`]: [`SuggestionEngine`], the ghost-text state machine
//! - [`timer`]: [`DebounceTimer`], cancellable one-shot timer
//! - [`driver`]: [`OverlayDriver`], serializes editor events into the engine
//!   and runs its timer and prediction requests
//! - [`predict`]: [`Predictor`] seam and the HTTP implementation
//!
//! Ghost text is drawn in the editor's buffer only. The hub sees the user's
//! edits, in shared-document positions, and suggestion text once it is kept.

pub mod driver;
pub mod engine;
pub mod predict;
pub mod timer;

pub use driver::{DriverClosed, OverlayDriver, OverlayHandle, OverlayStatus};
pub use engine::{
    confirmed_attributes, suggestion_attributes, KeyGesture, OverlayCommand, OverlayConfig,
    OverlayEvent, OverlayState, SuggestionEngine, SuggestionSpan,
};
pub use predict::{HttpPredictor, PredictError, Predictor, DEFAULT_PREDICT_URL};
pub use timer::DebounceTimer;
