mod refresh;

pub use refresh::{AggregateRefreshJob, NeighborRefreshJob, RefreshConfig, RefreshStats};
