pub mod early_stopping;
pub mod epoch_stats;
pub mod events;
pub mod loop_fn;
pub mod session;
pub mod train_config;

pub use early_stopping::{EarlyStopping, StoppingDecision};
pub use epoch_stats::{EpochRecord, ProgressEvent, WeightSnapshot};
pub use events::{parse_progress_line, ChannelSink, EventSink, LineProtocolSink, NullSink, ProgressLine};
pub use session::{CancelHandle, SessionState, TrainingOutcome, TrainingSession};
pub use train_config::TrainConfig;
