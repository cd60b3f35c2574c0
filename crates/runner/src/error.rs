use sim::SimError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("plant integration failed: {0}")]
    Plant(#[from] SimError),
    #[error("simulation thread panicked")]
    WorkerPanicked,
    #[error("could not spawn simulation thread: {0}")]
    Spawn(#[from] std::io::Error),
}
