//! Merges server-pushed events into local state. Server data is authoritative
//! for status/result/error; the user's layout is authoritative for position
//! once set. Merges must be idempotent: the stream is at-least-once and may
//! reorder across reconnects.

use iced::Point;
use serde::Deserialize;
use tracing::debug;

use crate::layout;
use crate::state::{Agent, AgentStats, AgentStatus, Chain, Task, TaskStatus, WorkspaceState};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PositionPayload {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentUpdate {
    pub name: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub stats: AgentStats,
}

fn unassigned() -> String {
    "unassigned".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskPayload {
    pub id: String,
    #[serde(default = "unassigned")]
    pub from: String,
    #[serde(default = "unassigned")]
    pub to: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub input_task_ids: Vec<String>,
    #[serde(default)]
    pub position: Option<PositionPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSnapshot {
    #[serde(default)]
    pub mission: String,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub agents: Vec<AgentUpdate>,
    #[serde(default)]
    pub tasks: Vec<TaskPayload>,
}

/// One variant per event kind the stream can push, so the match below is
/// checked for exhaustiveness.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Snapshot { workspace: WorkspaceSnapshot },
    WorkspaceProgress {
        progress: f32,
        #[serde(default)]
        message: Option<String>,
    },
    TaskCreated { task: TaskPayload },
    TaskStarted { task_id: String },
    TaskCompleted {
        task_id: String,
        #[serde(default)]
        result: Option<String>,
    },
    TaskFailed {
        task_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    Thinking { task_id: String, text: String },
    ToolCall { task_id: String, tool: String },
    ToolSuccess { task_id: String, tool: String },
    ToolError {
        task_id: String,
        tool: String,
        error: String,
    },
    Progress { task_id: String, progress: f32 },
    AgentStats { agents: Vec<AgentUpdate> },
}

impl WorkspaceState {
    pub fn apply_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Snapshot { workspace } => {
                debug!(
                    agents = workspace.agents.len(),
                    tasks = workspace.tasks.len(),
                    "applying snapshot"
                );
                self.mission = workspace.mission;
                self.progress = workspace.progress;
                self.merge_agents(&workspace.agents, true);
                self.merge_tasks(workspace.tasks);
                self.recompute_chains();
            }
            ServerEvent::WorkspaceProgress { progress, message } => {
                self.progress = progress;
                if let Some(message) = message {
                    self.push_timeline(message);
                }
            }
            ServerEvent::TaskCreated { task } => {
                self.push_timeline(format!("task {} created ({} → {})", task.id, task.from, task.to));
                self.merge_task(task);
                self.recompute_chains();
            }
            ServerEvent::TaskStarted { task_id } => {
                if let Some(task) = self.task_mut(&task_id) {
                    task.status = TaskStatus::InProgress;
                    self.push_timeline(format!("task {task_id} started"));
                    self.recompute_chains();
                }
            }
            ServerEvent::TaskCompleted { task_id, result } => {
                let destination = match self.task_mut(&task_id) {
                    Some(task) => {
                        task.status = TaskStatus::Completed;
                        task.progress = Some(100.0);
                        task.result = result.clone();
                        Some(task.to.clone())
                    }
                    None => None,
                };
                if let Some(to) = destination {
                    if let (Some(agent), Some(result)) = (self.agents.get_mut(&to), result) {
                        agent.last_result = Some(result);
                    }
                    self.push_timeline(format!("task {task_id} completed"));
                    self.recompute_chains();
                }
            }
            ServerEvent::TaskFailed { task_id, error } => {
                if let Some(task) = self.task_mut(&task_id) {
                    task.status = TaskStatus::Failed;
                    task.error = error;
                    self.push_timeline(format!("task {task_id} failed"));
                    self.recompute_chains();
                }
            }
            // Telemetry feeds the per-task log only, never task state.
            ServerEvent::Thinking { task_id, text } => {
                if let Some(task) = self.task_mut(&task_id) {
                    task.push_log(format!("thinking: {text}"));
                }
            }
            ServerEvent::ToolCall { task_id, tool } => {
                if let Some(task) = self.task_mut(&task_id) {
                    task.push_log(format!("tool call: {tool}"));
                }
            }
            ServerEvent::ToolSuccess { task_id, tool } => {
                if let Some(task) = self.task_mut(&task_id) {
                    task.push_log(format!("tool ok: {tool}"));
                }
            }
            ServerEvent::ToolError {
                task_id,
                tool,
                error,
            } => {
                if let Some(task) = self.task_mut(&task_id) {
                    task.push_log(format!("tool error: {tool}: {error}"));
                }
            }
            ServerEvent::Progress { task_id, progress } => {
                if let Some(task) = self.task_mut(&task_id) {
                    task.push_log(format!("progress {progress:.0}%"));
                }
            }
            ServerEvent::AgentStats { agents } => {
                self.merge_agents(&agents, false);
                self.recompute_chains();
            }
        }
    }

    /// Merge agent updates by name. With `authoritative` the update is a full
    /// snapshot: missing agents are created and agents the server no longer
    /// lists are dropped. Otherwise unknown names are silently ignored.
    fn merge_agents(&mut self, updates: &[AgentUpdate], authoritative: bool) {
        for update in updates {
            match self.agents.get_mut(&update.name) {
                Some(agent) => {
                    agent.status = update.status;
                    agent.stats = update.stats;
                }
                None if authoritative => {
                    let position = layout::place_agent(&self.agents);
                    let mut agent = Agent::new(&update.name, position);
                    agent.status = update.status;
                    agent.stats = update.stats;
                    self.agents.insert(update.name.clone(), agent);
                }
                None => {}
            }
        }
        if authoritative {
            self.agents
                .retain(|name, _| updates.iter().any(|u| &u.name == name));
        }
    }

    /// Replace the task list with the server's, carrying over everything the
    /// server does not own: locally set positions, cached bounds, eased
    /// progress, and the execution log.
    fn merge_tasks(&mut self, payloads: Vec<TaskPayload>) {
        let mut merged: Vec<Task> = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let local = self.tasks.iter_mut().find(|t| t.id == payload.id);
            merged.push(merge_one(local, payload));
        }
        // Keep optimistic inserts the server has not acknowledged yet.
        for task in self.tasks.drain(..) {
            if task.id.starts_with("local-") && !merged.iter().any(|t| t.id == task.id) {
                merged.push(task);
            }
        }
        self.tasks = merged;
    }

    fn merge_task(&mut self, payload: TaskPayload) {
        if let Some(index) = self.tasks.iter().position(|t| t.id == payload.id) {
            let merged = merge_one(Some(&mut self.tasks[index]), payload);
            self.tasks[index] = merged;
        } else {
            self.tasks.push(merge_one(None, payload));
        }
    }

    /// Chains are cheap to derive, so they are rebuilt from scratch after every
    /// task or agent-stats merge rather than updated incrementally.
    pub fn recompute_chains(&mut self) {
        let mut chains = Vec::new();
        for task in &self.tasks {
            for source_id in &task.input_task_ids {
                let Some(source) = self.task(source_id) else {
                    continue;
                };
                chains.push(Chain {
                    from_task: source.id.clone(),
                    to_task: task.id.clone(),
                    active: task.status == TaskStatus::InProgress,
                    completed: source.status == TaskStatus::Completed
                        && task.status == TaskStatus::Completed,
                    failed: source.status == TaskStatus::Failed
                        || task.status == TaskStatus::Failed,
                });
            }
        }
        self.chains = chains;
    }
}

fn merge_one(local: Option<&mut Task>, payload: TaskPayload) -> Task {
    let mut task = Task::new(payload.id, payload.from, payload.to);
    task.description = payload.description;
    task.status = payload.status;
    task.progress = payload.progress;
    task.result = payload.result;
    task.error = payload.error;
    task.input_task_ids = payload.input_task_ids;
    task.position = payload
        .position
        .map(|p| Point::new(p.x, p.y));

    if let Some(local) = local {
        if local.position.is_some() {
            task.position = local.position;
        }
        task.bounds = local.bounds;
        task.shown_progress = local.shown_progress;
        task.log = std::mem::take(&mut local.log);
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(id: &str) -> TaskPayload {
        TaskPayload {
            id: id.to_string(),
            from: "alpha".to_string(),
            to: "beta".to_string(),
            description: "do the thing".to_string(),
            status: TaskStatus::Pending,
            progress: None,
            result: None,
            error: None,
            input_task_ids: Vec::new(),
            position: None,
        }
    }

    fn snapshot(tasks: Vec<TaskPayload>) -> ServerEvent {
        ServerEvent::Snapshot {
            workspace: WorkspaceSnapshot {
                mission: "ship it".to_string(),
                progress: 0.0,
                agents: vec![
                    AgentUpdate {
                        name: "alpha".to_string(),
                        status: AgentStatus::Idle,
                        stats: AgentStats::default(),
                    },
                    AgentUpdate {
                        name: "beta".to_string(),
                        status: AgentStatus::Idle,
                        stats: AgentStats::default(),
                    },
                ],
                tasks,
            },
        }
    }

    #[test]
    fn snapshot_preserves_local_positions() {
        let mut state = WorkspaceState::new("ws");
        state.apply_server_event(snapshot(vec![payload("t1")]));
        state.task_mut("t1").unwrap().position = Some(Point::new(42.0, 17.0));

        let mut updated = payload("t1");
        updated.status = TaskStatus::InProgress;
        state.apply_server_event(snapshot(vec![updated]));

        let task = state.task("t1").unwrap();
        assert_eq!(task.position, Some(Point::new(42.0, 17.0)));
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn server_position_fills_in_when_local_is_unset() {
        let mut state = WorkspaceState::new("ws");
        let mut with_position = payload("t1");
        with_position.position = Some(PositionPayload { x: 5.0, y: 9.0 });
        state.apply_server_event(snapshot(vec![with_position]));
        assert_eq!(
            state.task("t1").unwrap().position,
            Some(Point::new(5.0, 9.0))
        );
    }

    #[test]
    fn snapshot_drops_stale_tasks_but_keeps_optimistic_inserts() {
        let mut state = WorkspaceState::new("ws");
        state.apply_server_event(snapshot(vec![payload("t1"), payload("t2")]));
        let local = state.insert_task_local("alpha", "beta", "speculative");

        state.apply_server_event(snapshot(vec![payload("t2")]));

        assert!(state.task("t1").is_none());
        assert!(state.task("t2").is_some());
        assert!(state.task(&local).is_some());
    }

    #[test]
    fn completion_propagates_result_to_destination_agent() {
        let mut state = WorkspaceState::new("ws");
        state.apply_server_event(snapshot(vec![payload("t1")]));
        state.apply_server_event(ServerEvent::TaskCompleted {
            task_id: "t1".to_string(),
            result: Some("42".to_string()),
        });

        assert_eq!(state.task("t1").unwrap().status, TaskStatus::Completed);
        assert_eq!(
            state.agents["beta"].last_result.as_deref(),
            Some("42")
        );
    }

    #[test]
    fn completion_is_idempotent() {
        let mut state = WorkspaceState::new("ws");
        state.apply_server_event(snapshot(vec![payload("t1")]));
        let event = ServerEvent::TaskCompleted {
            task_id: "t1".to_string(),
            result: Some("done".to_string()),
        };
        state.apply_server_event(event.clone());
        let status_once = state.task("t1").unwrap().status;
        state.apply_server_event(event);
        assert_eq!(state.task("t1").unwrap().status, status_once);
        assert_eq!(state.tasks.len(), 1);
    }

    #[test]
    fn unknown_agent_stats_are_ignored() {
        let mut state = WorkspaceState::new("ws");
        state.apply_server_event(snapshot(vec![]));
        state.apply_server_event(ServerEvent::AgentStats {
            agents: vec![AgentUpdate {
                name: "ghost".to_string(),
                status: AgentStatus::Busy,
                stats: AgentStats::default(),
            }],
        });
        assert!(!state.agents.contains_key("ghost"));
    }

    #[test]
    fn stats_merge_by_name_updates_status() {
        let mut state = WorkspaceState::new("ws");
        state.apply_server_event(snapshot(vec![]));
        state.apply_server_event(ServerEvent::AgentStats {
            agents: vec![AgentUpdate {
                name: "alpha".to_string(),
                status: AgentStatus::Busy,
                stats: AgentStats {
                    current: 2,
                    queued: 3,
                    completed: 1,
                    failed: 0,
                },
            }],
        });
        let agent = &state.agents["alpha"];
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.stats.queued, 3);
    }

    #[test]
    fn telemetry_feeds_log_not_state() {
        let mut state = WorkspaceState::new("ws");
        state.apply_server_event(snapshot(vec![payload("t1")]));
        state.apply_server_event(ServerEvent::Progress {
            task_id: "t1".to_string(),
            progress: 60.0,
        });
        let task = state.task("t1").unwrap();
        assert_eq!(task.progress, None);
        assert_eq!(task.log.len(), 1);

        // Unknown task: silently dropped.
        state.apply_server_event(ServerEvent::Thinking {
            task_id: "nope".to_string(),
            text: "hm".to_string(),
        });
    }

    #[test]
    fn chains_derive_from_input_edges() {
        let mut state = WorkspaceState::new("ws");
        let mut downstream = payload("t2");
        downstream.status = TaskStatus::InProgress;
        downstream.input_task_ids = vec!["t1".to_string(), "missing".to_string()];
        state.apply_server_event(snapshot(vec![payload("t1"), downstream]));

        assert_eq!(state.chains.len(), 1);
        let chain = &state.chains[0];
        assert_eq!(chain.from_task, "t1");
        assert_eq!(chain.to_task, "t2");
        assert!(chain.active);
        assert!(!chain.completed);
        assert!(!chain.failed);
    }

    #[test]
    fn failed_endpoint_marks_chain_failed() {
        let mut state = WorkspaceState::new("ws");
        let mut upstream = payload("t1");
        upstream.status = TaskStatus::Failed;
        let mut downstream = payload("t2");
        downstream.input_task_ids = vec!["t1".to_string()];
        state.apply_server_event(snapshot(vec![upstream, downstream]));

        assert!(state.chains[0].failed);
        assert!(!state.chains[0].active);
    }

    #[test]
    fn event_json_decodes_into_tagged_variants() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"task_completed","task_id":"t9","result":"ok"}"#,
        )
        .unwrap();
        match event {
            ServerEvent::TaskCompleted { task_id, result } => {
                assert_eq!(task_id, "t9");
                assert_eq!(result.as_deref(), Some("ok"));
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }
}
