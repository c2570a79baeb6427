use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "shotctl")]
#[command(version, about = "Shotdiff work queue command line tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Work queue server URL
    #[arg(long, env = "SHOTDIFF_SERVER_URL", default_value = "http://localhost:8082")]
    server_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task to a queue
    /// Examples:
    ///     shotctl add capture --payload '{"run_name": "home", "url": "https://example.com"}'
    ///     shotctl add diff --payload @diff.json --source release-7 --task-id diff-home-7
    #[command(verbatim_doc_comment)]
    Add {
        queue: String,

        /// JSON payload, or @path to read it from a file
        #[arg(short, long)]
        payload: String,

        /// Tag naming who added the task
        #[arg(short, long, default_value = "")]
        source: String,

        /// Explicit task id; adding the same id twice is a no-op
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Cancel live tasks by id or source
    Cancel {
        queue: String,

        #[arg(long)]
        task_id: Option<String>,

        #[arg(short, long)]
        source: Option<String>,
    },
    /// List tasks, newest first
    List {
        queue: String,

        /// live, done, error or canceled
        #[arg(long)]
        status: Option<String>,

        #[arg(short, long)]
        limit: Option<u32>,

        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one task
    Get { queue: String, task_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let base_url = cli.server_url.trim_end_matches('/').to_string();
    let client = Client::new();

    match cli.command {
        Commands::Add {
            queue,
            payload,
            source,
            task_id,
        } => {
            let payload = read_payload(&payload)?;
            add_task(&client, &base_url, &queue, payload, &source, task_id).await?;
        }
        Commands::Cancel {
            queue,
            task_id,
            source,
        } => {
            if task_id.is_none() && source.is_none() {
                anyhow::bail!("cancel needs --task-id or --source");
            }
            cancel_tasks(&client, &base_url, &queue, task_id, source).await?;
        }
        Commands::List {
            queue,
            status,
            limit,
            json,
        } => {
            list_tasks(&client, &base_url, &queue, status, limit, json).await?;
        }
        Commands::Get { queue, task_id } => {
            get_task(&client, &base_url, &queue, &task_id).await?;
        }
    }
    Ok(())
}

/// Validate the payload as JSON and return it as the string the queue stores.
fn read_payload(arg: &str) -> Result<String> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {}", path))?,
        None => arg.to_string(),
    };
    let value: Value = serde_json::from_str(&raw).context("Payload is not valid JSON")?;
    Ok(value.to_string())
}

async fn post(client: &Client, url: &str, body: Value) -> Result<Value> {
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to send request to {}", url))?;
    read_response(response).await
}

async fn read_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(text);
        anyhow::bail!("{} - {}", status, message);
    }
    Ok(serde_json::from_str(&text)?)
}

async fn add_task(
    client: &Client,
    base_url: &str,
    queue: &str,
    payload: String,
    source: &str,
    task_id: Option<String>,
) -> Result<()> {
    let mut body = json!({ "payload": payload, "source": source });
    if let Some(task_id) = task_id {
        body["task_id"] = Value::String(task_id);
    }
    let url = format!("{}/work_queue/{}/add", base_url, queue);
    let result = post(client, &url, body).await?;
    println!("{}", result["task_id"].as_str().unwrap_or_default());
    Ok(())
}

async fn cancel_tasks(
    client: &Client,
    base_url: &str,
    queue: &str,
    task_id: Option<String>,
    source: Option<String>,
) -> Result<()> {
    let url = format!("{}/work_queue/{}/cancel", base_url, queue);
    let result = post(client, &url, json!({ "task_id": task_id, "source": source })).await?;
    println!("Canceled {} task(s)", result["canceled"].as_u64().unwrap_or(0));
    Ok(())
}

async fn list_tasks(
    client: &Client,
    base_url: &str,
    queue: &str,
    status: Option<String>,
    limit: Option<u32>,
    json_only: bool,
) -> Result<()> {
    let url = format!("{}/work_queue/{}", base_url, queue);
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(status) = status {
        query.push(("status", status));
    }
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }

    let response = client
        .get(&url)
        .query(&query)
        .send()
        .await
        .context("Failed to send list request")?;
    let result = read_response(response).await?;

    if json_only {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    let tasks = result["tasks"].as_array().cloned().unwrap_or_default();
    println!("{:<34} {:<9} {:>8} {:<22} {}", "TASK", "STATUS", "ATTEMPTS", "OWNER", "SOURCE");
    for task in &tasks {
        println!("{}", format_row(task));
    }
    println!("{} task(s) in {}", tasks.len(), queue);
    Ok(())
}

async fn get_task(client: &Client, base_url: &str, queue: &str, task_id: &str) -> Result<()> {
    let url = format!("{}/work_queue/{}/task/{}", base_url, queue, task_id);
    let response = client
        .get(&url)
        .send()
        .await
        .context("Failed to send get request")?;
    let result = read_response(response).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn format_row(task: &Value) -> String {
    format!(
        "{:<34} {:<9} {:>8} {:<22} {}",
        task["task_id"].as_str().unwrap_or("-"),
        task["status"].as_str().unwrap_or("-"),
        task["lease_attempts"].as_i64().unwrap_or(0),
        task["last_owner"].as_str().unwrap_or("-"),
        task["source"].as_str().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from([
            "shotctl",
            "--server-url",
            "http://queue:9000",
            "add",
            "capture",
            "--payload",
            "{}",
            "--task-id",
            "t1",
        ])
        .unwrap();
        assert_eq!(cli.server_url, "http://queue:9000");
        match cli.command {
            Commands::Add { queue, task_id, source, .. } => {
                assert_eq!(queue, "capture");
                assert_eq!(task_id.as_deref(), Some("t1"));
                assert_eq!(source, "");
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_read_payload() {
        assert_eq!(read_payload(r#"{ "url": "x" }"#).unwrap(), r#"{"url":"x"}"#);
        assert!(read_payload("not json").is_err());
    }

    #[test]
    fn test_format_row() {
        let task = json!({
            "task_id": "t1",
            "status": "live",
            "lease_attempts": 2,
            "last_owner": "worker-1",
            "source": "release-7"
        });
        let row = format_row(&task);
        assert!(row.starts_with("t1"));
        assert!(row.contains("live"));
        assert!(row.ends_with("release-7"));
    }
}
