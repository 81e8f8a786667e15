// =============================================================================
// Pipeline — bootstrap, incremental update, polling cycle
// =============================================================================

pub mod bootstrap;
pub mod cycle;
pub mod update;

pub use bootstrap::bootstrap;
pub use cycle::{run_cycle, CycleOutcome};
