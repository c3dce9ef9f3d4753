pub mod handler;
pub mod pool;

pub use handler::{Disposition, EvaluationHandler, FileRole, HandlerError};
pub use pool::{WorkerPool, WorkerSettings};
