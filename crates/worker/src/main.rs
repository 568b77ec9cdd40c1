use std::sync::Arc;

use notifyq::config::Config;
use notifyq::db;
use notifyq::delivery::PgMessageStatusRepo;
use notifyq::jobs::{HaltSignal, IntervalTicker, JobQueue, JobsRepo, Reaper, Ticker, Worker};
use tokio::task::JoinSet;
use tracing::{error, info};

mod handlers;
use handlers::{DeliveryHandler, LogRelay};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyq::logging::init();
    let cfg = Config::from_env()?;

    info!(
        worker_index = cfg.worker_index,
        worker_count = cfg.worker_count,
        wait_max_ms = cfg.wait_max_ms,
        heartbeat_ms = cfg.heartbeat_ms,
        lease_seconds = cfg.lease_seconds,
        migrate_on_startup = cfg.migrate_on_startup,
        "notifyq worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let queue = Arc::new(JobsRepo::with_config(pool.clone(), cfg.queue_config()));
    let handler = Arc::new(DeliveryHandler::new(
        pool.clone(),
        Arc::new(LogRelay),
        PgMessageStatusRepo,
    ));

    let mut halts: Vec<HaltSignal> = Vec::new();
    let mut tasks = JoinSet::new();

    // ---- Worker pool ----
    for n in 0..cfg.worker_count {
        let mut worker = Worker::new(cfg.worker_index + n, queue.clone(), handler.clone());
        if let Some(interval) = cfg.heartbeat_interval() {
            worker = worker.with_heartbeat(interval);
        }
        halts.push(worker.halt_signal());
        tasks.spawn(async move { worker.work().await.map_err(anyhow::Error::from) });
    }

    // ---- Reaper ----
    let mut reaper = Reaper::new(
        queue.clone(),
        IntervalTicker::new(cfg.reap_interval()),
        cfg.lease(),
    );
    halts.push(reaper.halt_signal());
    tasks.spawn(async move { reaper.run().await.map_err(anyhow::Error::from) });

    // ---- Gauges ----
    let gauge_halt = HaltSignal::new();
    halts.push(gauge_halt.clone());
    {
        let queue = queue.clone();
        let mut ticker = IntervalTicker::new(cfg.gauge_interval());
        tasks.spawn(async move {
            ticker.start();
            loop {
                tokio::select! {
                    biased;
                    _ = gauge_halt.requested() => break,
                    _ = ticker.tick() => {
                        let gauges = queue.gauges().await?;
                        info!(
                            depth = gauges.depth,
                            retry_counts = ?gauges.retry_counts,
                            "queue gauges"
                        );
                    }
                }
            }
            ticker.stop();
            Ok::<(), anyhow::Error>(())
        });
    }

    // First task to finish (error or not) or ctrl-c halts everything.
    let first = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutdown requested");
            None
        }
        joined = tasks.join_next() => joined,
    };

    for halt in &halts {
        halt.request();
    }

    let mut failed = false;
    if let Some(joined) = first {
        failed |= report(joined);
    }
    while let Some(joined) = tasks.join_next().await {
        failed |= report(joined);
    }

    if failed {
        anyhow::bail!("a worker task failed; exiting so the supervisor can restart us");
    }
    info!("notifyq worker stopped");
    Ok(())
}

fn report(joined: Result<anyhow::Result<()>, tokio::task::JoinError>) -> bool {
    match joined {
        Ok(Ok(())) => false,
        Ok(Err(err)) => {
            error!(error = %err, "task failed");
            true
        }
        Err(err) => {
            error!(error = %err, "task panicked");
            true
        }
    }
}
