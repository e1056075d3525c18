pub mod decision;
pub mod monitor;
pub mod ports;

pub use decision::{execute_targets, DecisionEngine, DecisionOutcome, ExecutionOutcome};
pub use monitor::{MonitorCycle, MonitorOutcome};
pub use ports::{notify_best_effort, AnyNotifier, Broker, LogNotifier, Notifier};
