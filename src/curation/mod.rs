mod assembler;
mod backfill;
mod relevance;
mod statistics;
mod window;

pub use assembler::{AssemblyReport, EpisodeAssembler};
pub use backfill::{BackfillOutcome, BackfillReconciler, BackfillReport, EpisodeBackfill};
pub use relevance::{
    DecisionReason, FilterDecision, FilterOutcome, KeywordScorer, PreferenceMatcher,
    RelevanceFilter, RelevanceScorer, TermKind, TermMatch,
};
pub use statistics::StatisticsRecorder;
pub use window::{WindowParams, WindowSelector, DEFAULT_EPISODE_CAP, DEFAULT_WINDOW_HOURS};
