//! Units of work started by the manager once it leads.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Error returned by a failing runnable.
pub type RunnableError = Box<dyn std::error::Error + Send + Sync>;

/// Long-running task owned by the manager, e.g. a controller.
///
/// `start` runs until `shutdown` fires. Returning early with `Ok` is allowed;
/// returning an error stops the manager.
#[async_trait]
pub trait Runnable: Send {
    fn name(&self) -> &str;

    async fn start(self: Box<Self>, shutdown: CancellationToken) -> Result<(), RunnableError>;
}
