pub mod batch;
pub mod engine;

pub use batch::{BatchSignalCollector, SignalBatch};
pub use engine::{AlertEngine, AlertOutcome, CooldownGate};
