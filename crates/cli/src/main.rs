//! Gearflow CLI - operator client for the scheduler's JSON-RPC surface

mod output;
mod rpc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Map, Value};

use crate::output::{jobs_table, rules_table, states_table, text};
use crate::rpc::call_rpc;

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "gearflow")]
#[command(about = "Gearflow scheduler CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "GEARFLOW_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Act as this user; permission checks apply
    #[arg(long, env = "GEARFLOW_UID", global = true)]
    uid: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job from a JSON spec (inline or @file)
    Enqueue {
        spec: String,
    },

    /// Show a job
    Get {
        job_id: String,
        /// Print the full document
        #[arg(long)]
        json: bool,
    },

    /// Move a job to a new state
    Mutate {
        job_id: String,
        #[arg(long)]
        state: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Refresh a running job's heartbeat
    Heartbeat {
        job_id: String,
    },

    /// Retry a failed job
    Retry {
        job_id: String,
        /// Ignore the attempt ceiling
        #[arg(long)]
        force: bool,
    },

    /// Claim (or peek at) pending jobs
    Ask(AskArgs),

    /// Job counts per state
    Stats(SelectorArgs),

    /// Jobs touching the given containers
    Search {
        /// Container as `type:id`, e.g. `session:ses-1`
        #[arg(long = "container", required = true)]
        containers: Vec<String>,
        #[arg(long = "state")]
        states: Vec<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, default_value = "0")]
        skip: u32,
    },

    /// Batch proposals
    #[command(subcommand)]
    Batch(BatchCommands),

    /// Gear rules
    #[command(subcommand)]
    Rules(RuleCommands),

    /// Publish a gear from a JSON document (inline or @file)
    PublishGear {
        spec: String,
    },

    /// Publish a container event from JSON (inline or @file)
    PublishEvent {
        spec: String,
    },
}

#[derive(Args, Default)]
struct SelectorArgs {
    #[arg(long = "group")]
    groups: Vec<String>,
    #[arg(long = "gear")]
    gears: Vec<String>,
    /// `!tag` excludes
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long = "provider")]
    providers: Vec<String>,
}

#[derive(Args)]
struct AskArgs {
    #[command(flatten)]
    selector: SelectorArgs,
    #[arg(long, default_value = "1")]
    jobs: u32,
    /// Capabilities this engine offers
    #[arg(long = "capability")]
    capabilities: Vec<String>,
    /// Report without claiming
    #[arg(long)]
    peek: bool,
}

#[derive(Subcommand)]
enum BatchCommands {
    /// Propose a batch from a JSON request (inline or @file)
    Propose { spec: String },
    /// Propose a batch of preconstructed job specs (JSON array, inline or @file)
    ProposeJobs { specs: String },
    Run { batch_id: String },
    Cancel { batch_id: String },
    Get { batch_id: String },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// Add a rule from a JSON document (inline or @file)
    Add {
        #[arg(long)]
        project: String,
        spec: String,
    },
    List {
        #[arg(long)]
        project: String,
    },
    /// Copy the site rules into a project
    CopySite {
        #[arg(long)]
        project: String,
    },
}

/// Inline JSON, or `@path` to read it from a file
fn read_json(arg: &str) -> Result<Value> {
    let body = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&body).context("Invalid JSON")
}

/// `session:ses-1` -> `{"type": "session", "id": "ses-1"}`
fn parse_container(arg: &str) -> Result<Value> {
    let (kind, id) = arg
        .split_once(':')
        .filter(|(kind, id)| !kind.is_empty() && !id.is_empty())
        .with_context(|| format!("Expected type:id, got {}", arg))?;
    Ok(json!({"type": kind, "id": id}))
}

fn with_uid(mut params: Value, uid: &Option<String>) -> Value {
    if let (Some(uid), Some(map)) = (uid, params.as_object_mut()) {
        map.insert("uid".to_string(), json!(uid));
    }
    params
}

impl SelectorArgs {
    fn whitelist(&self) -> Value {
        json!({
            "group": self.groups,
            "gear-name": self.gears,
            "compute-provider": self.providers,
        })
    }
}

fn ask_params(args: &AskArgs, states: bool) -> Value {
    let mut want = Map::new();
    want.insert("jobs".to_string(), json!(args.jobs));
    want.insert("states".to_string(), json!(states));
    want.insert("peek".to_string(), json!(args.peek));
    json!({
        "whitelist": args.selector.whitelist(),
        "tags": args.selector.tags,
        "capabilities": args.capabilities,
        "return": want,
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn as_list(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let url = cli.rpc_url.as_str();
    let uid = &cli.uid;

    match cli.command {
        Commands::Enqueue { spec } => {
            let params = with_uid(json!({ "job": read_json(&spec)? }), uid);
            let job = call_rpc(url, "jobs.enqueue.v1", params).await?;
            println!("{}", "✓ Job enqueued".green().bold());
            println!("{}", jobs_table(std::slice::from_ref(&job)));
        }

        Commands::Get { job_id, json } => {
            let job = call_rpc(url, "jobs.get.v1", json!({ "job_id": job_id })).await?;
            if json {
                print_json(&job)?;
            } else {
                println!("{}", jobs_table(std::slice::from_ref(&job)));
                if let Some(reason) = job.get("failure_reason").and_then(Value::as_str) {
                    println!("  {} {}", "Failure:".bold(), reason.red());
                }
            }
        }

        Commands::Mutate {
            job_id,
            state,
            reason,
        } => {
            let mut params = json!({ "job_id": job_id, "state": state });
            if let Some(reason) = reason {
                params["failure_reason"] = json!(reason);
            }
            let job = call_rpc(url, "jobs.mutate.v1", params).await?;
            println!(
                "{}",
                format!("✓ Job {} is {}", job_id, text(&job["state"])).green().bold()
            );
        }

        Commands::Heartbeat { job_id } => {
            call_rpc(url, "jobs.heartbeat.v1", json!({ "job_id": job_id })).await?;
            println!("{}", format!("✓ Heartbeat recorded for {}", job_id).green());
        }

        Commands::Retry { job_id, force } => {
            let result =
                call_rpc(url, "jobs.retry.v1", json!({ "job_id": job_id, "force": force })).await?;
            match result.get("job_id").and_then(Value::as_str) {
                Some(new_id) => println!("{}", format!("✓ Retried as {}", new_id).green().bold()),
                None => println!("{}", "○ Attempt ceiling reached; not retried".yellow()),
            }
        }

        Commands::Ask(args) => {
            let result = call_rpc(url, "queue.ask.v1", ask_params(&args, false)).await?;
            let jobs = as_list(&result["jobs"]);
            if jobs.is_empty() {
                println!("{}", "No matching pending jobs".yellow());
            } else {
                let verb = if args.peek { "Next" } else { "Claimed" };
                println!("{}", format!("{} {} job(s)", verb, jobs.len()).cyan().bold());
                println!("{}", jobs_table(jobs));
            }
        }

        Commands::Stats(selector) => {
            let args = AskArgs {
                selector,
                jobs: 0,
                capabilities: Vec::new(),
                peek: false,
            };
            let result = call_rpc(url, "queue.ask.v1", ask_params(&args, true)).await?;
            println!("{}", "Queue".cyan().bold());
            println!("{}", states_table(&result["states"]));
        }

        Commands::Search {
            containers,
            states,
            tags,
            skip,
        } => {
            let containers = containers
                .iter()
                .map(|c| parse_container(c))
                .collect::<Result<Vec<_>>>()?;
            let params = with_uid(
                json!({ "containers": containers, "states": states, "tags": tags, "skip": skip }),
                uid,
            );
            let jobs = call_rpc(url, "jobs.search.v1", params).await?;
            println!("{}", jobs_table(as_list(&jobs)));
        }

        Commands::Batch(command) => match command {
            BatchCommands::Propose { spec } => {
                let params = with_uid(read_json(&spec)?, uid);
                let outcome = call_rpc(url, "batch.propose.v1", params).await?;
                print_json(&outcome)?;
            }
            BatchCommands::ProposeJobs { specs } => {
                let params = with_uid(json!({ "jobs": read_json(&specs)? }), uid);
                let batch = call_rpc(url, "batch.propose_jobs.v1", params).await?;
                println!("{}", format!("✓ Batch {} proposed", text(&batch["id"])).green().bold());
            }
            BatchCommands::Run { batch_id } => {
                let result = call_rpc(url, "batch.run.v1", json!({ "batch_id": batch_id })).await?;
                println!("{}", format!("✓ Batch {} running", batch_id).green().bold());
                println!("{}", jobs_table(as_list(&result["jobs"])));
            }
            BatchCommands::Cancel { batch_id } => {
                let result =
                    call_rpc(url, "batch.cancel.v1", json!({ "batch_id": batch_id })).await?;
                println!(
                    "{}",
                    format!(
                        "✓ Batch {} cancelled ({} jobs)",
                        batch_id,
                        text(&result["cancelled_jobs"])
                    )
                    .green()
                    .bold()
                );
            }
            BatchCommands::Get { batch_id } => {
                let result = call_rpc(url, "batch.get.v1", json!({ "batch_id": batch_id })).await?;
                println!(
                    "  {} {}",
                    "State:".bold(),
                    text(&result["batch"]["state"])
                );
                println!("{}", jobs_table(as_list(&result["jobs"])));
            }
        },

        Commands::Rules(command) => match command {
            RuleCommands::Add { project, spec } => {
                let params = json!({ "project_id": project, "rule": read_json(&spec)? });
                let rule = call_rpc(url, "rules.add.v1", params).await?;
                println!("{}", format!("✓ Rule {} added", text(&rule["id"])).green().bold());
            }
            RuleCommands::List { project } => {
                let rules = call_rpc(url, "rules.list.v1", json!({ "project_id": project })).await?;
                println!("{}", rules_table(as_list(&rules)));
            }
            RuleCommands::CopySite { project } => {
                let result =
                    call_rpc(url, "rules.copy_site.v1", json!({ "project_id": project })).await?;
                println!(
                    "{}",
                    format!("✓ Copied {} site rule(s)", text(&result["copied"])).green().bold()
                );
            }
        },

        Commands::PublishGear { spec } => {
            let gear = call_rpc(url, "gears.publish.v1", json!({ "gear": read_json(&spec)? })).await?;
            println!(
                "{}",
                format!(
                    "✓ Published {}:{} as {}",
                    text(&gear["name"]),
                    text(&gear["version"]),
                    text(&gear["id"])
                )
                .green()
                .bold()
            );
        }

        Commands::PublishEvent { spec } => {
            let report = call_rpc(url, "events.publish.v1", read_json(&spec)?).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}
