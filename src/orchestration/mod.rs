// Flow orchestration: phased run control and cancellation

pub mod cancellation;
pub mod flow_controller;

pub use cancellation::CancellationToken;
pub use flow_controller::{FlowController, FlowObserver, RunOptions};
