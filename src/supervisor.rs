use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Delay before a crashed worker is replaced, preventing crash-loop storms
    pub respawn_delay: Duration,
    /// How long stopping workers may take before being force-aborted
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            respawn_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Keeps exactly one live worker per shard.
///
/// Generic over the worker factory so the restart and shutdown behavior is
/// testable with stub workers. Each worker gets a child of the shutdown
/// token and observes it on its own, independently of the supervisor.
pub struct Supervisor<F> {
    spawn_worker: F,
    options: SupervisorOptions,
}

impl<F, Fut> Supervisor<F>
where
    F: Fn(usize, CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(spawn_worker: F) -> Self {
        Self::with_options(spawn_worker, SupervisorOptions::default())
    }

    pub fn with_options(spawn_worker: F, options: SupervisorOptions) -> Self {
        Self {
            spawn_worker,
            options,
        }
    }

    /// Runs until the shutdown token is cancelled and every worker handle
    /// has been reaped. An empty shard list is a successful no-op.
    pub async fn run(&self, shard_names: &[String], shutdown: CancellationToken) -> Result<()> {
        if shard_names.is_empty() {
            warn!("no shards configured, nothing to do");
            return Ok(());
        }

        info!(workers = shard_names.len(), "starting workers");

        let mut workers: JoinSet<Result<()>> = JoinSet::new();
        let mut shard_of: HashMap<Id, usize> = HashMap::new();

        for shard in 0..shard_names.len() {
            self.spawn(shard, shard_names, &shutdown, &mut workers, &mut shard_of);
        }

        while !shutdown.is_cancelled() && !workers.is_empty() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                exited = workers.join_next_with_id() => {
                    let Some(exited) = exited else { break };
                    let Some(shard) = log_exit(shard_names, &mut shard_of, exited, false) else {
                        continue;
                    };

                    // Replace the worker only when not stopping, and give a
                    // crashed one a breather first.
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = sleep(self.options.respawn_delay) => {
                            info!(shard = %shard_names[shard], "respawning worker");
                            self.spawn(shard, shard_names, &shutdown, &mut workers, &mut shard_of);
                        }
                    }
                }
            }
        }

        self.drain(shard_names, &mut workers, &mut shard_of).await;
        info!("all workers reaped, supervisor stopped");
        Ok(())
    }

    fn spawn(
        &self,
        shard: usize,
        shard_names: &[String],
        shutdown: &CancellationToken,
        workers: &mut JoinSet<Result<()>>,
        shard_of: &mut HashMap<Id, usize>,
    ) {
        let handle = workers.spawn((self.spawn_worker)(shard, shutdown.child_token()));
        shard_of.insert(handle.id(), shard);
        info!(shard = %shard_names[shard], "worker started");
    }

    /// Waits for the remaining workers to observe the cancellation, then
    /// force-aborts stragglers. Returns only when the join set is empty.
    async fn drain(
        &self,
        shard_names: &[String],
        workers: &mut JoinSet<Result<()>>,
        shard_of: &mut HashMap<Id, usize>,
    ) {
        if workers.is_empty() {
            return;
        }

        info!(count = workers.len(), "waiting for workers to stop");
        let deadline = Instant::now() + self.options.shutdown_timeout;

        loop {
            match timeout_at(deadline, workers.join_next_with_id()).await {
                Ok(None) => break,
                Ok(Some(exited)) => {
                    log_exit(shard_names, shard_of, exited, true);
                }
                Err(_) => {
                    warn!(count = workers.len(), "shutdown timeout, aborting stragglers");
                    workers.abort_all();
                    while let Some(exited) = workers.join_next_with_id().await {
                        log_exit(shard_names, shard_of, exited, true);
                    }
                    break;
                }
            }
        }
    }
}

/// Classifies one worker exit (clean return, error return, panic, abort),
/// logs it, and returns the shard index the task was bound to.
fn log_exit(
    shard_names: &[String],
    shard_of: &mut HashMap<Id, usize>,
    exited: Result<(Id, Result<()>), JoinError>,
    stopping: bool,
) -> Option<usize> {
    match exited {
        Ok((task_id, outcome)) => {
            let shard = shard_of.remove(&task_id)?;
            match outcome {
                Ok(()) if stopping => info!(shard = %shard_names[shard], "worker stopped"),
                Ok(()) => warn!(shard = %shard_names[shard], "worker exited unexpectedly"),
                Err(cause) => {
                    error!(shard = %shard_names[shard], error = %cause, "worker failed")
                }
            }
            Some(shard)
        }
        Err(join_error) => {
            let shard = shard_of.remove(&join_error.id())?;
            if join_error.is_panic() {
                error!(shard = %shard_names[shard], "worker crashed");
            } else if join_error.is_cancelled() {
                warn!(shard = %shard_names[shard], "worker force-killed");
            } else {
                warn!(shard = %shard_names[shard], "worker exited for an unknown reason");
            }
            Some(shard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn options() -> SupervisorOptions {
        SupervisorOptions {
            respawn_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|index| format!("shard-{index}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn empty_shard_list_is_a_successful_noop() {
        let supervisor = Supervisor::new(|_shard, _token| async move { Ok(()) });
        supervisor
            .run(&[], CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn starts_one_worker_per_shard_and_respawns_the_crashed_one() {
        let spawned: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let crashed_once = Arc::new(AtomicBool::new(false));

        let factory = {
            let spawned = spawned.clone();
            let crashed_once = crashed_once.clone();
            move |shard: usize, token: CancellationToken| {
                spawned.lock().unwrap().push(shard);
                let crashed_once = crashed_once.clone();
                async move {
                    if shard == 1 && !crashed_once.swap(true, Ordering::SeqCst) {
                        anyhow::bail!("simulated crash");
                    }
                    token.cancelled().await;
                    Ok(())
                }
            }
        };

        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                Supervisor::with_options(factory, options())
                    .run(&names(3), shutdown)
                    .await
            }
        });

        // Let the crash and the delayed respawn play out
        sleep(Duration::from_secs(30)).await;
        {
            let spawned = spawned.lock().unwrap();
            assert_eq!(spawned.len(), 4, "3 initial spawns + 1 respawn");
            assert_eq!(spawned[3], 1, "respawn binds the same shard");
        }

        shutdown.cancel();
        run.await.unwrap().unwrap();
        // No further respawns happened during shutdown
        assert_eq!(spawned.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reaps_cooperative_and_stubborn_workers() {
        let factory = |shard: usize, token: CancellationToken| async move {
            if shard == 0 {
                // Ignores its token entirely; must be force-aborted
                std::future::pending::<()>().await;
            } else {
                token.cancelled().await;
            }
            Ok(())
        };

        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                Supervisor::with_options(factory, options())
                    .run(&names(3), shutdown)
                    .await
            }
        });

        sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        // Completion of run() is the zero-leaks guarantee: every handle,
        // including the aborted straggler, has been joined.
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_worker_is_replaced() {
        let spawned = Arc::new(Mutex::new(Vec::new()));
        let panicked_once = Arc::new(AtomicBool::new(false));

        let factory = {
            let spawned = spawned.clone();
            let panicked_once = panicked_once.clone();
            move |shard: usize, token: CancellationToken| {
                spawned.lock().unwrap().push(shard);
                let panicked_once = panicked_once.clone();
                async move {
                    if shard == 2 && !panicked_once.swap(true, Ordering::SeqCst) {
                        panic!("simulated panic");
                    }
                    token.cancelled().await;
                    Ok(())
                }
            }
        };

        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                Supervisor::with_options(factory, options())
                    .run(&names(3), shutdown)
                    .await
            }
        });

        sleep(Duration::from_secs(30)).await;
        assert_eq!(spawned.lock().unwrap().len(), 4);

        shutdown.cancel();
        run.await.unwrap().unwrap();
    }
}
