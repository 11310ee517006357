pub mod app;
pub mod observability;
pub mod shutdown;

pub use app::{Application, WatchOptions};
pub use shutdown::ShutdownManager;
