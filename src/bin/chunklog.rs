//! chunklog CLI: run the worker pool and poke at the queue.

use chunklog::blob::ObjectBlobStore;
use chunklog::blob::paths::log_path;
use chunklog::cache::PgEphemeralStore;
use chunklog::config::Config;
use chunklog::config::secrets::redacted_url;
use chunklog::context::Context;
use chunklog::db::Db;
use chunklog::engine::{PoolConfig, WorkerPool};
use chunklog::handlers::HandlerRegistry;
use chunklog::model::chunk::{ChunkPayload, TaskId};
use chunklog::model::job::{JobId, JobState};
use chunklog::producer;
use chunklog::queue::{EnqueueResult, PgJobQueue};
use chunklog::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "chunklog", about = "Ordered log capture and archival")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool until Ctrl-C
    Serve {
        /// Number of concurrent executors
        #[arg(long)]
        concurrency: Option<usize>,
        /// Queue namespace
        #[arg(long)]
        namespace: Option<String>,
        /// TOML file with [pipeline] overrides
        #[arg(long)]
        config: Option<PathBuf>,
        /// Seconds a reserved job stays hidden before redelivery
        #[arg(long, default_value_t = 300)]
        visibility_timeout: u64,
    },
    /// Submit jobs
    Enqueue {
        #[command(subcommand)]
        action: EnqueueAction,
    },
    /// Inspect jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Delete expired ephemeral entries
    Purge,
}

#[derive(Subcommand)]
enum EnqueueAction {
    /// Queue one log chunk for a task
    Chunk {
        task_id: String,
        content: String,
        /// Producer-assigned position (1-based)
        #[arg(long)]
        position: Option<u32>,
    },
    /// Schedule archival of a finished task to logs/{app_slug}/{version_id}/{task_id}.log
    Archive {
        task_id: String,
        app_slug: String,
        version_id: String,
        count: u32,
        /// Override the configured archival delay
        #[arg(long)]
        delay_secs: Option<u64>,
    },
    /// Copy an uploaded file into another version
    Copy {
        app_slug: String,
        from_version_id: String,
        to_version_id: String,
        resource_id: String,
        extension: String,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Show a job
    Show {
        /// Job ID (full UUID)
        id: String,
    },
    /// List recent jobs
    List {
        /// Filter by state
        #[arg(long)]
        state: Option<String>,
        /// Maximum jobs to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve {
            concurrency,
            namespace,
            config: file,
            visibility_timeout,
        } => cmd_serve(config, concurrency, namespace, file, visibility_timeout).await,
        Command::Enqueue { action } => {
            let db = connect(&config, 2).await?;
            let queue = PgJobQueue::new(db, config.pipeline.namespace.clone());
            queue.create().await?;
            cmd_enqueue(&config, &queue, action).await
        }
        Command::Job { action } => {
            let db = connect(&config, 2).await?;
            match action {
                JobAction::Show { id } => cmd_job_show(&db, &id).await,
                JobAction::List { state, limit } => {
                    cmd_job_list(&db, &config.pipeline.namespace, state, limit).await
                }
            }
        }
        Command::Purge => {
            let db = connect(&config, 2).await?;
            let removed = PgEphemeralStore::new(db).purge_expired().await?;
            println!("Purged {removed} expired entr{}", if removed == 1 { "y" } else { "ies" });
            Ok(())
        }
    }
}

async fn connect(config: &Config, max_connections: u32) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect_with(config.database_url.expose_secret(), max_connections).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

async fn cmd_serve(
    mut config: Config,
    concurrency: Option<usize>,
    namespace: Option<String>,
    file: Option<PathBuf>,
    visibility_timeout: u64,
) -> anyhow::Result<()> {
    if let Some(path) = file {
        config.pipeline = config.pipeline.merge_file(&path)?;
    }
    if let Some(n) = concurrency {
        config.pipeline.concurrency = n;
    }
    if let Some(ns) = namespace {
        config.pipeline.namespace = ns;
    }
    config.pipeline.validate()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "chunklog".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    info!(database = %redacted_url(&config.database_url), "connecting");
    // One connection per executor plus headroom for producers sharing the pool.
    let db = connect(&config, config.pipeline.concurrency as u32 + 2).await?;

    let queue = PgJobQueue::new(Arc::clone(&db), config.pipeline.namespace.clone())
        .with_visibility_timeout(Duration::from_secs(visibility_timeout));
    queue.create().await?;

    let ctx = Context::new(
        Arc::new(PgEphemeralStore::new(Arc::clone(&db))),
        Arc::new(queue),
        Arc::new(ObjectBlobStore::from_url(&config.blob_store_url)?),
        config.pipeline.clone(),
    );

    let registry = HandlerRegistry::with_defaults();
    info!(handlers = ?registry.names().collect::<Vec<_>>(), "handlers registered");

    let pool = WorkerPool::new(
        Arc::new(ctx),
        Arc::new(registry),
        PoolConfig::from_settings(&config.pipeline),
    );

    let handle = pool.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown requested, draining");
        handle.shutdown();
    });

    pool.run().await?;
    Ok(())
}

async fn cmd_enqueue(
    config: &Config,
    queue: &PgJobQueue,
    action: EnqueueAction,
) -> anyhow::Result<()> {
    let result = match action {
        EnqueueAction::Chunk {
            task_id,
            content,
            position,
        } => {
            let chunk = match position {
                Some(p) => ChunkPayload::at(p, content),
                None => ChunkPayload::new(content),
            };
            producer::publish_chunk(queue, &config.pipeline, &TaskId::parse(task_id)?, chunk)
                .await?
        }
        EnqueueAction::Archive {
            task_id,
            app_slug,
            version_id,
            count,
            delay_secs,
        } => {
            let task_id = TaskId::parse(task_id)?;
            let aws_path = log_path(&app_slug, &version_id, task_id.as_str());
            let mut settings = config.pipeline.clone();
            if let Some(secs) = delay_secs {
                settings.archive_delay = Duration::from_secs(secs);
            }
            producer::finish_task(queue, &settings, &task_id, &aws_path, count).await?
        }
        EnqueueAction::Copy {
            app_slug,
            from_version_id,
            to_version_id,
            resource_id,
            extension,
        } => {
            producer::copy_uploadable(
                queue,
                &app_slug,
                &from_version_id,
                &to_version_id,
                &resource_id,
                &extension,
            )
            .await?
        }
    };

    match result {
        EnqueueResult::Enqueued(id) => println!("Enqueued: {}", id.0),
        EnqueueResult::Duplicate { existing } => {
            println!("Duplicate: already pending as {}", existing.0)
        }
    }
    Ok(())
}

async fn cmd_job_show(db: &Db, id: &str) -> anyhow::Result<()> {
    let id = JobId(uuid::Uuid::parse_str(id)?);
    let job = db.get_job(id).await?;

    println!("ID:         {}", job.id.0);
    println!("Queue:      {}", job.queue);
    println!("Job:        {}", job.job_name);
    println!("State:      {}", job.state);
    println!("Attempts:   {}", job.attempts);
    println!("Dedup Key:  {}", job.dedup_key.as_deref().unwrap_or("-"));
    println!("Run At:     {}", job.run_at);
    println!("Created:    {}", job.created_at);
    println!("Updated:    {}", job.updated_at);
    if let Some(resolved) = job.resolved_at {
        println!("Resolved:   {resolved}");
    }
    if let Some(ref err) = job.last_error {
        println!("Last Error: {err}");
    }
    println!("Payload:    {}", serde_json::to_string_pretty(&job.payload)?);
    Ok(())
}

async fn cmd_job_list(
    db: &Db,
    queue: &str,
    state: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let state: Option<JobState> = match state {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid state: {s}"))?,
        ),
        None => None,
    };

    let jobs = db.list_jobs(queue, state, limit).await?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<22}  {:<10}  {:<3}  CREATED",
        "ID", "JOB", "STATE", "TRY"
    );
    println!("{}", "-".repeat(70));
    for job in &jobs {
        println!(
            "{:<8}  {:<22}  {:<10}  {:<3}  {}",
            job.id,
            job.job_name,
            job.state,
            job.attempts,
            job.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} job(s)", jobs.len());
    println!(
        "{} pending, {} message(s) in pgmq",
        db.pending_jobs(queue).await?,
        db.queue_length(queue).await?
    );
    Ok(())
}
