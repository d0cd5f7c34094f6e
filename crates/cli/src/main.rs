//! Quarry CLI - Command-line interface for the Quarry job engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry job engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "QUARRY_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new job
    Enqueue {
        /// Handler class name (e.g., quarry.noop)
        class_name: String,

        /// Queue name
        #[arg(short, long, default_value = "default")]
        queue: String,

        /// Priority (higher runs first)
        #[arg(short, long, default_value = "0")]
        priority: i32,

        /// Arguments as a JSON string
        #[arg(short, long, default_value = "[]")]
        args: String,

        /// Run no earlier than this many seconds from now
        #[arg(long = "in", value_name = "SECS", conflicts_with = "at")]
        delay_secs: Option<u64>,

        /// Run no earlier than this epoch-millis timestamp
        #[arg(long)]
        at: Option<i64>,

        /// Concurrency key; jobs sharing it are limited together
        #[arg(long, requires = "concurrency_limit")]
        concurrency_key: Option<String>,

        /// Jobs allowed to run at once under the concurrency key
        #[arg(long, requires = "concurrency_key")]
        concurrency_limit: Option<i32>,

        /// How long a held slot or blocked job stays valid (seconds)
        #[arg(long, default_value = "180")]
        concurrency_duration_secs: u64,
    },

    /// Show one job
    Status {
        /// Job ID
        job_id: i64,
    },

    /// Re-admit a failed job
    Retry {
        /// Job ID
        job_id: i64,
    },

    /// Show queue depth, live processes and recent outcomes
    Stats {
        /// Trailing window for finished/failed counts (seconds)
        #[arg(long, default_value = "3600")]
        window_secs: u64,
    },

    /// Run maintenance operations
    Maintenance {
        /// Force VACUUM even if not needed
        #[arg(long)]
        force_vacuum: bool,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct JobStatusRow {
    job_id: i64,
    status: String,
}

#[derive(Deserialize, Tabled)]
struct QueueRow {
    #[tabled(rename = "queue")]
    queue_name: String,
    ready: i64,
    scheduled: i64,
    claimed: i64,
    blocked: i64,
    failed: i64,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to engine")?
        .json()
        .await
        .context("Failed to parse response")?;

    into_result(response)
}

fn into_result(response: JsonRpcResponse) -> Result<serde_json::Value> {
    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

struct EnqueueArgs {
    class_name: String,
    queue: String,
    priority: i32,
    args: String,
    scheduled_at: Option<i64>,
    concurrency: Option<(String, i32, u64)>,
}

fn enqueue_params(enqueue: EnqueueArgs) -> Result<serde_json::Value> {
    let arguments: serde_json::Value =
        serde_json::from_str(&enqueue.args).context("Invalid JSON arguments")?;

    let mut params = json!({
        "queue_name": enqueue.queue,
        "class_name": enqueue.class_name,
        "arguments": arguments,
        "priority": enqueue.priority,
    });
    if let Some(at) = enqueue.scheduled_at {
        params["scheduled_at"] = json!(at);
    }
    if let Some((key, limit, duration_secs)) = enqueue.concurrency {
        params["concurrency"] = json!({
            "key": key,
            "limit": limit,
            "duration_ms": duration_secs.saturating_mul(1000),
        });
    }
    Ok(params)
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn mb(bytes: &serde_json::Value) -> f64 {
    bytes.as_i64().unwrap_or(0) as f64 / (1024.0 * 1024.0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Enqueue {
            class_name,
            queue,
            priority,
            args,
            delay_secs,
            at,
            concurrency_key,
            concurrency_limit,
            concurrency_duration_secs,
        } => {
            let scheduled_at = match (at, delay_secs) {
                (Some(at), _) => Some(at),
                (None, Some(secs)) => Some(now_millis() + (secs as i64).saturating_mul(1000)),
                (None, None) => None,
            };
            let concurrency = concurrency_key
                .zip(concurrency_limit)
                .map(|(key, limit)| (key, limit, concurrency_duration_secs));

            let params = enqueue_params(EnqueueArgs {
                class_name,
                queue,
                priority,
                args,
                scheduled_at,
                concurrency,
            })?;

            let result = call_rpc(&cli.rpc_url, "jobs.enqueue.v1", params).await?;
            let row: JobStatusRow = serde_json::from_value(result)?;

            println!("{}", "✓ Job enqueued successfully".green().bold());
            println!();
            println!("{}", Table::new(vec![row]));
        }

        Commands::Status { job_id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.status.v1", json!({ "job_id": job_id })).await?;

            println!("{}", format!("Job {}", job_id).cyan().bold());
            println!();
            println!("  {} {}", "Status:".bold(), result["status"].as_str().unwrap_or("?"));
            println!("  {} {}", "Queue:".bold(), result["queue_name"].as_str().unwrap_or("?"));
            println!("  {} {}", "Class:".bold(), result["class_name"].as_str().unwrap_or("?"));
            println!("  {} {}", "Attempts:".bold(), result["attempts"]);
            if !result["finished_at"].is_null() {
                println!("  {} {}", "Finished at:".bold(), result["finished_at"]);
            }
            if let Some(error) = result["error"].as_str() {
                println!("  {} {}", "Error:".bold(), error.red());
            }
        }

        Commands::Retry { job_id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.retry.v1", json!({ "job_id": job_id })).await?;
            let row: JobStatusRow = serde_json::from_value(result)?;
            println!(
                "{}",
                format!("✓ Job {} re-admitted ({})", row.job_id, row.status).green().bold()
            );
        }

        Commands::Stats { window_secs } => {
            println!("{}", "Engine Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({ "window_secs": window_secs }))
                .await
            {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!("  {} {}", "Workers:".bold(), stats["active_workers"]);
                    println!("  {} {}", "Dispatchers:".bold(), stats["active_dispatchers"]);
                    println!();
                    println!(
                        "  {} {} finished, {} failed ({:.1}% failure rate)",
                        format!("Last {}s:", window_secs).bold(),
                        stats["finished_in_window"],
                        stats["failed_in_window"],
                        stats["failure_rate"].as_f64().unwrap_or(0.0) * 100.0
                    );
                    println!();

                    let queues: Vec<QueueRow> =
                        serde_json::from_value(stats["queues"].clone()).unwrap_or_default();
                    if queues.is_empty() {
                        println!("  {}", "No jobs in any queue".yellow());
                    } else {
                        println!("{}", Table::new(queues));
                    }
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Maintenance { force_vacuum } => {
            println!("{}", "Running maintenance...".cyan().bold());
            println!();

            if force_vacuum {
                println!("  {} Force VACUUM enabled", "•".bold());
            }

            let params = json!({ "force_vacuum": force_vacuum });

            match call_rpc(&cli.rpc_url, "admin.maintenance.v1", params).await {
                Ok(result) => {
                    println!("  ✓ Maintenance completed");
                    println!();
                    if result["vacuum_run"].as_bool().unwrap_or(false) {
                        println!("  {} VACUUM executed", "✓".green());
                    } else {
                        println!("  ○ VACUUM skipped (not needed)");
                    }
                    println!("  {} {} finished jobs deleted", "✓".green(), result["jobs_deleted"]);
                    println!(
                        "  {} {} failed jobs deleted",
                        "✓".green(),
                        result["failed_jobs_deleted"]
                    );
                    println!();
                    let size_before_mb = mb(&result["db_size_before"]);
                    let size_after_mb = mb(&result["db_size_after"]);
                    println!(
                        "  {} {:.2} MB → {:.2} MB",
                        "DB Size:".bold(),
                        size_before_mb,
                        size_after_mb
                    );
                }
                Err(e) => {
                    println!("  {} Maintenance failed: {}", "✗".red(), e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &str) -> EnqueueArgs {
        EnqueueArgs {
            class_name: "SendEmail".to_string(),
            queue: "mail".to_string(),
            priority: 3,
            args: args.to_string(),
            scheduled_at: None,
            concurrency: None,
        }
    }

    #[test]
    fn test_enqueue_params_minimal() {
        let params = enqueue_params(args(r#"{"to": "a@example.com"}"#)).unwrap();
        assert_eq!(params["queue_name"], "mail");
        assert_eq!(params["class_name"], "SendEmail");
        assert_eq!(params["priority"], 3);
        assert_eq!(params["arguments"]["to"], "a@example.com");
        assert!(params.get("scheduled_at").is_none());
        assert!(params.get("concurrency").is_none());
    }

    #[test]
    fn test_enqueue_params_with_schedule_and_concurrency() {
        let mut request = args("[]");
        request.scheduled_at = Some(1_700_000_000_000);
        request.concurrency = Some(("account:1".to_string(), 2, 60));

        let params = enqueue_params(request).unwrap();
        assert_eq!(params["scheduled_at"], 1_700_000_000_000_i64);
        assert_eq!(params["concurrency"]["key"], "account:1");
        assert_eq!(params["concurrency"]["limit"], 2);
        assert_eq!(params["concurrency"]["duration_ms"], 60_000);
    }

    #[test]
    fn test_enqueue_params_rejects_bad_json() {
        assert!(enqueue_params(args("{not json")).is_err());
    }

    #[test]
    fn test_rpc_error_is_surfaced() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 4001, "message": "job 9" }
        }))
        .unwrap();
        let err = into_result(response).unwrap_err();
        assert_eq!(err.to_string(), "RPC error (4001): job 9");
    }

    #[test]
    fn test_cli_parses_enqueue() {
        let cli = Cli::try_parse_from([
            "quarry",
            "enqueue",
            "quarry.sleep",
            "--queue",
            "slow",
            "--args",
            r#"{"ms": 10}"#,
            "--in",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue {
                class_name,
                queue,
                delay_secs,
                ..
            } => {
                assert_eq!(class_name, "quarry.sleep");
                assert_eq!(queue, "slow");
                assert_eq!(delay_secs, Some(30));
            }
            _ => panic!("expected enqueue"),
        }
    }
}
