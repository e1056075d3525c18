pub mod engine;
pub mod exit_orchestrator;

pub use engine::{MonitorConfig, MonitorReport, StopMonitor};
pub use exit_orchestrator::{CloseInstruction, ExitOrchestrator, ExitTrigger};
