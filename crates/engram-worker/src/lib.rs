pub mod coordinator;
pub mod registry;
pub mod server;

pub use coordinator::{SpawnCommand, WorkerConfig, WorkerCoordinator, WorkerSignal, DEFAULT_WORKER_PORT};
pub use registry::JobRegistry;
pub use server::{ServerConfig, WorkerHandle};
