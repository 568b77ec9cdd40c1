use std::env;
use std::time::Duration;

use chrono::Utc;
use notifyq::db;
use notifyq::delivery::{DeliveryContext, DeliveryOptions, Enqueuer, PgMessageStatusRepo, User};
use notifyq::jobs::{JobQueue, JobsRepo};
use sqlx::PgPool;

const USAGE: &str = "notifyqctl <command>\n\
     Commands:\n\
     - reset                 truncate jobs and message statuses\n\
     - stats                 queue depth and per-retry-count gauges\n\
     - reap <lease_seconds>  release claims not renewed within the lease\n\
     - seed <n>              enqueue one request with n recipients\n\
     \n\
     Uses DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyq::logging::init();
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    dotenvy::dotenv().ok();
    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or TEST_DATABASE_URL must be set"))?;

    let pool = db::make_pool(&url).await?;
    db::run_migrations(&pool).await?;
    let repo = JobsRepo::new(pool.clone());

    match command.as_str() {
        "reset" => reset(&pool).await?,
        "stats" => stats(&repo).await?,
        "reap" => {
            let lease_seconds: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(60);
            let reaped = repo
                .reap_expired(Duration::from_secs(lease_seconds))
                .await?;
            println!("reaped {reaped} expired claims (lease={lease_seconds}s)");
        }
        "seed" => {
            let n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&pool, repo, n).await?;
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE jobs, message_statuses RESTART IDENTITY")
        .execute(pool)
        .await?;

    println!("reset OK");
    Ok(())
}

async fn stats(repo: &JobsRepo) -> anyhow::Result<()> {
    let gauges = repo.gauges().await?;
    println!("jobs: depth={}", gauges.depth);
    for (retry_count, n) in &gauges.retry_counts {
        println!("  retry_count={retry_count}: {n}");
    }
    Ok(())
}

async fn seed(pool: &PgPool, repo: JobsRepo, n: usize) -> anyhow::Result<()> {
    let enqueuer = Enqueuer::new(repo, PgMessageStatusRepo);
    let users: Vec<User> = (0..n)
        .map(|i| User::with_email(format!("user-{i}@example.com")))
        .collect();

    let options = DeliveryOptions {
        kind_id: "seed".to_string(),
        subject: "notifyqctl seed".to_string(),
        text: "hello from notifyqctl".to_string(),
        ..DeliveryOptions::default()
    };
    let context = DeliveryContext {
        space: String::new(),
        organization: String::new(),
        client_id: "notifyqctl".to_string(),
        uaa_host: String::new(),
        scope: String::new(),
        vcap_request_id: format!("seed-{}", Utc::now().timestamp_millis()),
        request_received: Utc::now(),
    };

    for response in enqueuer.enqueue(pool, &users, &options, &context).await? {
        println!(
            "+ queued {} for {} ({})",
            response.notification_id, response.recipient, response.status
        );
    }
    Ok(())
}
