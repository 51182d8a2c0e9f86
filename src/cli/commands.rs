use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::dispatcher::ExecutionMode;
use crate::engine::{Engine, RunningEngine};
use crate::error::{codes, HttpError};
use crate::logging::{init_logging, LogConfig, LogFormat};
use crate::loadtest::{self, LoadConfig};
use crate::middleware::{
    AccessLog, HandlerResult, MemoryCache, Metrics, Middleware, RequestSpan, ResponseCache,
    SecurityHeaders,
};
use crate::runtime_config::EngineConfig;
use crate::server::Request;

/// Command-line interface for the neurite load generator
///
/// Builds a sample route set in-process, drives it with concurrent callers
/// and shuts the engine down gracefully.
#[derive(Parser, Debug)]
#[command(name = "neurite-loadgen", version)]
#[command(about = "In-process load generator for the neurite dispatch engine", long_about = None)]
pub struct Cli {
    /// YAML engine configuration; `NEURITE_*` variables override it
    #[arg(short, long, global = true, env = "NEURITE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormatArg>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the sample routes and print a report
    Run {
        /// Concurrent callers
        #[arg(short = 'n', long, default_value_t = 8)]
        concurrency: usize,

        /// Total requests to send
        #[arg(short, long)]
        requests: Option<u64>,

        /// Wall-clock budget in milliseconds
        #[arg(short, long)]
        duration_ms: Option<u64>,

        /// Override the configured execution mode
        #[arg(long, value_enum)]
        execution: Option<ExecutionArg>,

        /// Override the configured worker count
        #[arg(long)]
        workers: Option<usize>,

        /// Print the reports as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the sample route table
    Routes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionArg {
    Inline,
    Pooled,
}

impl From<ExecutionArg> for ExecutionMode {
    fn from(arg: ExecutionArg) -> Self {
        match arg {
            ExecutionArg::Inline => ExecutionMode::Inline,
            ExecutionArg::Pooled => ExecutionMode::Pooled,
        }
    }
}

/// Parse arguments and run.
pub fn run_cli() -> anyhow::Result<()> {
    run(Cli::parse())
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut log_config = LogConfig::from_env();
    if let Some(format) = cli.log_format {
        log_config.format = match format {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        };
    }
    init_logging(&log_config)?;

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::from_env().context("invalid environment configuration")?,
    };

    match cli.command {
        Commands::Routes => {
            let engine = sample_engine(config)?;
            for (method, pattern) in engine.dispatcher().table().routes() {
                println!("{:<7} {pattern}", method.as_str());
            }
            engine.shutdown(Duration::from_secs(1));
            Ok(())
        }
        Commands::Run {
            concurrency,
            requests,
            duration_ms,
            execution,
            workers,
            json,
        } => {
            if let Some(execution) = execution {
                config.execution = execution.into();
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            config.validate()?;

            let engine = sample_engine(config)?;
            let load = LoadConfig {
                concurrency,
                requests,
                duration: duration_ms.map(Duration::from_millis),
            };
            let report = loadtest::run(&engine, &load, sample_request);
            let shutdown = engine.shutdown_default();

            if json {
                let out = serde_json::json!({
                    "load": report,
                    "engine": engine.stats(),
                    "shutdown": shutdown,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("requests      {}", report.requests);
                println!("errors        {}", report.errors);
                println!("elapsed       {:.3}s", report.elapsed.as_secs_f64());
                println!("throughput    {:.0} req/s", report.requests_per_sec);
                println!(
                    "latency       min {:?} / avg {:?} / max {:?}",
                    report.min_latency, report.avg_latency, report.max_latency
                );
                for (status, count) in &report.statuses {
                    println!("status {status}    {count}");
                }
                println!(
                    "shutdown      {} in {:?} (abandoned requests {}, jobs {})",
                    if shutdown.is_clean() { "clean" } else { "forced" },
                    shutdown.elapsed,
                    shutdown.abandoned_requests,
                    shutdown.pool.as_ref().map_or(0, |p| p.abandoned.len()),
                );
            }
            Ok(())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoBody {
    message: String,
}

/// The route set driven by `run`.
pub fn sample_engine(config: EngineConfig) -> anyhow::Result<RunningEngine> {
    let slow = config.slow_request_threshold();
    let mut engine = Engine::new(config)?;
    let metrics = Arc::new(Metrics::new());

    let routes = engine.router();
    routes
        .use_middleware(RequestSpan)
        .use_middleware(AccessLog::new().skip_path("/health").slow_threshold(slow))
        .use_middleware(SecurityHeaders::new())
        .use_shared(metrics);

    routes.get("/health", |ctx: &mut Context| -> HandlerResult {
        ctx.text(StatusCode::OK, "ok")
    })?;
    routes.get("/static/*path", |ctx: &mut Context| -> HandlerResult {
        let path = ctx.param("path").unwrap_or_default().to_string();
        ctx.text(StatusCode::OK, &path)
    })?;

    let cache: Arc<dyn Middleware> = Arc::new(ResponseCache::new(
        Arc::new(MemoryCache::new(4096)),
        Duration::from_secs(5),
    ));
    let mut api = routes.group("/api", Vec::new());
    api.get("/users/:id", |ctx: &mut Context| -> HandlerResult {
        let id: u64 = ctx
            .param("id")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                HttpError::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, "id must be numeric")
            })?;
        ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
    })?;
    api.get("/users/:id/posts/:post_id", |ctx: &mut Context| -> HandlerResult {
        let body = serde_json::json!({
            "user": ctx.param("id"),
            "post": ctx.param("post_id"),
        });
        ctx.json(StatusCode::OK, &body)
    })?;
    api.route_with(
        Method::GET,
        "/catalog",
        Arc::new(|ctx: &mut Context| -> HandlerResult {
            ctx.json(StatusCode::OK, &serde_json::json!({ "items": [1, 2, 3] }))
        }),
        vec![cache],
    )?;
    api.post("/echo", |ctx: &mut Context| -> HandlerResult {
        let body: EchoBody = ctx.bind_json()?;
        ctx.json(StatusCode::OK, &body)
    })?;

    Ok(engine.start())
}

/// The n-th request of a run, cycling over the sample routes plus one miss.
pub fn sample_request(n: u64) -> Request {
    match n % 6 {
        0 => Request::get("/health"),
        1 => Request::get(&format!("/api/users/{n}")),
        2 => Request::get(&format!("/api/users/{}/posts/{}", n % 97, n % 7)),
        3 => Request::post("/api/echo")
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"message":"hello {n}"}}"#)),
        4 => Request::get("/api/catalog?page=1"),
        _ => Request::get("/does/not/exist"),
    }
}
