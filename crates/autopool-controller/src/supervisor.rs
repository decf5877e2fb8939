//! Supervisor — owns the per-pool controller tasks.

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::controller::PoolController;

#[derive(Default)]
pub struct Supervisor {
    tasks: JoinSet<String>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a controller on its own task until `shutdown` flips.
    pub fn spawn(&mut self, controller: PoolController, shutdown: watch::Receiver<bool>) {
        let name = controller.name().to_string();
        info!(pool = %name, "spawning pool controller");
        self.tasks.spawn(async move {
            controller.run(shutdown).await;
            name
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every controller to stop. Returns the names of the pools
    /// whose task exited cleanly.
    pub async fn join_all(mut self) -> Vec<String> {
        let mut stopped = Vec::new();
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(name) => {
                    info!(pool = %name, "pool controller stopped");
                    stopped.push(name);
                }
                Err(e) => error!(error = %e, "pool controller task failed"),
            }
        }
        stopped.sort();
        stopped
    }
}
