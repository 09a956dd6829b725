pub mod dc_blocker;
pub mod delay;
pub mod dtd;
pub mod erle;
pub mod fft;
pub mod nlms;
pub mod noise_suppressor;
pub mod pbfdaf;
pub mod utils;

pub use dc_blocker::DcBlocker;
pub use delay::{DelayEstimator, DelayLine};
pub use dtd::DoubleTalkDetector;
pub use erle::ErleTracker;
pub use nlms::TimeDomainNlms;
pub use noise_suppressor::{NoiseSuppressor, NoiseSuppressorConfig};
pub use pbfdaf::PartitionedFilter;
