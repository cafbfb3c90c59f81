pub mod event_sink;
pub mod pattern_feedback;
pub mod position_monitor;
pub mod reconciler;
pub mod signal_listener;

pub use event_sink::{BroadcastSink, EventSink};
pub use pattern_feedback::{HistoricalFeedback, PatternFeedback, PatternPerformance, StaticFeedback};
pub use signal_listener::{Enqueued, SignalIntake};
