//! CLI command handlers.
//!
//! Each handler returns the JSON document printed on stdout. State is loaded
//! from the data directory before dispatch and written back only after a
//! mutating command succeeds. Mutating commands hold the data directory lock
//! from load until save.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::{debug, info};

use guild_coordinator::{AssignmentEngine, Bid, BidEvaluator, GuildConfig};
use guild_core::{Priority, TaskFilter, TaskId, TaskSpec, TaskStatus};
use guild_events::{EventBus, EventBusBuilder, InMemoryEventStore};

use crate::cli::{Cli, Commands};
use crate::state::StateDir;

/// Execute a CLI invocation end to end.
///
/// # Errors
///
/// Returns an error if configuration or state cannot be loaded, the command
/// is rejected by the engine, or the state cannot be saved.
pub async fn execute_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => GuildConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GuildConfig::default(),
    };

    let bus = Arc::new(
        EventBusBuilder::new()
            .with_store(InMemoryEventStore::new_arc())
            .with_channel_capacity(config.events.channel_capacity)
            .build()?,
    );
    let engine = AssignmentEngine::in_memory(&config).with_events(bus.clone());

    let state = StateDir::new(&cli.data_dir);
    let output = if cli.command.is_mutating() {
        let lock = state
            .lock(config.store.lock_timeout())
            .await
            .with_context(|| format!("Failed to lock {}", cli.data_dir.display()))?;
        lock.load_into(&engine)
            .await
            .with_context(|| format!("Failed to load state from {}", cli.data_dir.display()))?;

        let output = run_command(&engine, cli.command).await?;

        lock.save(&engine)
            .await
            .with_context(|| format!("Failed to save state to {}", cli.data_dir.display()))?;
        output
    } else {
        state
            .load_into(&engine)
            .await
            .with_context(|| format!("Failed to load state from {}", cli.data_dir.display()))?;
        run_command(&engine, cli.command).await?
    };

    log_emitted_events(&bus).await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Dispatch one command against `engine` and return its JSON output.
///
/// # Errors
///
/// Returns the engine's error for rejected operations and a parse error for
/// malformed arguments.
pub async fn run_command(engine: &AssignmentEngine, command: Commands) -> Result<Value> {
    match command {
        Commands::Publish {
            title,
            description,
            requirements,
            priority,
            created_by,
        } => cmd_publish(engine, title, description, requirements, &priority, created_by).await,

        Commands::Accept { task_id, agent, eta } => {
            to_json(engine.accept(&TaskId::from(task_id), &agent, eta).await?)
        }

        Commands::Start { task_id, agent } => {
            to_json(engine.start(&TaskId::from(task_id), &agent).await?)
        }

        Commands::Complete {
            task_id,
            agent,
            result,
        } => {
            let payload = parse_result(&result);
            to_json(engine.complete(&TaskId::from(task_id), &agent, payload).await?)
        }

        Commands::Fail {
            task_id,
            agent,
            reason,
        } => to_json(engine.fail(&TaskId::from(task_id), &agent, reason).await?),

        Commands::Show { task_id } => to_json(engine.get_task(&TaskId::from(task_id)).await?),

        Commands::List {
            status,
            assigned_to,
            created_by,
        } => cmd_list(engine, status.as_deref(), assigned_to, created_by).await,

        Commands::Browse { capabilities } => to_json(engine.browse(&capabilities).await?),

        Commands::Agents => to_json(engine.list_agents().await?),

        Commands::Agent { agent_id } => to_json(engine.get_agent(&agent_id).await?),

        Commands::Stats => to_json(engine.stats().await?),

        Commands::SelectBid {
            task_id,
            bids,
            assign,
        } => cmd_select_bid(engine, TaskId::from(task_id), &bids, assign).await,
    }
}

async fn cmd_publish(
    engine: &AssignmentEngine,
    title: String,
    description: String,
    requirements: Vec<String>,
    priority: &str,
    created_by: Option<String>,
) -> Result<Value> {
    let spec = TaskSpec::new(title, description)
        .with_requirements(requirements)
        .with_priority(Priority::from_str(priority)?);
    let spec = match created_by {
        Some(creator) => spec.created_by(creator),
        None => spec,
    };

    let task = engine.publish(&spec).await?;
    info!(task_id = %task.id, "Published task");
    to_json(task)
}

async fn cmd_list(
    engine: &AssignmentEngine,
    status: Option<&str>,
    assigned_to: Option<String>,
    created_by: Option<String>,
) -> Result<Value> {
    let filter = TaskFilter {
        status: status.map(TaskStatus::from_str).transpose()?,
        assigned_to,
        created_by,
    };
    to_json(engine.list_tasks(&filter).await?)
}

async fn cmd_select_bid(
    engine: &AssignmentEngine,
    task_id: TaskId,
    bids_path: &Path,
    assign: bool,
) -> Result<Value> {
    let task = engine.get_task(&task_id).await?;
    let bids = read_bids(bids_path).await?;

    let evaluator = BidEvaluator::default();
    let ranked = evaluator.rank(&task, &bids);
    let winner = ranked.first().cloned();

    let assigned = match (&winner, assign) {
        (Some(winner), true) => Some(
            engine
                .accept(&task_id, &winner.bid.agent_id, Some(winner.bid.eta.clone()))
                .await?,
        ),
        (None, true) => bail!("No eligible bid for task {task_id}"),
        (_, false) => None,
    };

    Ok(json!({
        "taskId": task_id,
        "policy": evaluator.policy_name(),
        "ranked": ranked,
        "winner": winner,
        "assigned": assigned,
    }))
}

async fn read_bids(path: &Path) -> Result<Vec<Bid>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read bids from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse bids in {}", path.display()))
}

/// Completion payloads are JSON when they parse, otherwise a plain string.
fn parse_result(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Log the notifications emitted during this invocation.
async fn log_emitted_events(bus: &EventBus) -> Result<()> {
    let events = bus.replay_from(None).await?;
    for event in &events {
        info!(
            event_type = event.event_type(),
            task_id = %event.task_id(),
            "Event emitted"
        );
    }
    debug!(count = events.len(), "Events emitted");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn engine() -> AssignmentEngine {
        AssignmentEngine::in_memory(&GuildConfig::default())
    }

    async fn publish(engine: &AssignmentEngine, requirements: Vec<String>) -> String {
        let output = run_command(
            engine,
            Commands::Publish {
                title: "Research".to_string(),
                description: "Research trends".to_string(),
                requirements,
                priority: "high".to_string(),
                created_by: Some("publisher".to_string()),
            },
        )
        .await
        .unwrap();
        output["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_parse_result_prefers_json() {
        assert_eq!(parse_result(r#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(parse_result("42"), json!(42));
        assert_eq!(parse_result("done"), json!("done"));
    }

    #[tokio::test]
    async fn test_publish_outputs_open_task() {
        let engine = engine();
        let id = publish(&engine, vec!["research".to_string()]).await;

        let shown = run_command(&engine, Commands::Show { task_id: id }).await.unwrap();
        assert_eq!(shown["status"], "OPEN");
        assert_eq!(shown["priority"], "HIGH");
        assert_eq!(shown["createdBy"], "publisher");
    }

    #[tokio::test]
    async fn test_unknown_priority_is_rejected() {
        let result = run_command(
            &engine(),
            Commands::Publish {
                title: "t".to_string(),
                description: "d".to_string(),
                requirements: Vec::new(),
                priority: "urgent".to_string(),
                created_by: None,
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let engine = engine();
        let first = publish(&engine, Vec::new()).await;
        publish(&engine, Vec::new()).await;
        run_command(
            &engine,
            Commands::Accept {
                task_id: first.clone(),
                agent: "agent-a".to_string(),
                eta: None,
            },
        )
        .await
        .unwrap();

        let listed = run_command(
            &engine,
            Commands::List {
                status: Some("assigned".to_string()),
                assigned_to: None,
                created_by: None,
            },
        )
        .await
        .unwrap();

        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], first.as_str());
    }

    #[tokio::test]
    async fn test_select_bid_assigns_winner() {
        let engine = engine();
        let id = publish(&engine, vec!["research".to_string()]).await;
        let bids = json!([
            {"agentId": "B", "taskId": id, "eta": "1 hour", "reputation": 90, "capabilities": ["research"]},
            {"agentId": "C", "taskId": id, "eta": "3 hours", "reputation": 95, "capabilities": ["research"]},
        ]);
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), bids.to_string()).unwrap();

        let output = run_command(
            &engine,
            Commands::SelectBid {
                task_id: id,
                bids: file.path().to_path_buf(),
                assign: true,
            },
        )
        .await
        .unwrap();

        assert_eq!(output["policy"], "reputation_eta");
        assert_eq!(output["winner"]["bid"]["agentId"], "C");
        assert_eq!(output["winner"]["score"], 947);
        assert_eq!(output["assigned"]["assignedTo"], "C");
        assert_eq!(output["assigned"]["eta"], "3 hours");
    }

    #[tokio::test]
    async fn test_select_bid_without_eligible_bid_fails_when_assigning() {
        let engine = engine();
        let id = publish(&engine, vec!["code".to_string()]).await;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[]").unwrap();

        let result = run_command(
            &engine,
            Commands::SelectBid {
                task_id: id,
                bids: file.path().to_path_buf(),
                assign: true,
            },
        )
        .await;
        assert!(result.is_err());
    }
}
