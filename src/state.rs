use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use iced::widget::canvas;
use iced::{Color, Point, Rectangle, Size};
use serde::{Deserialize, Serialize};

use crate::graph::Camera;

pub const TIMELINE_CAP: usize = 200;
pub const TASK_LOG_CAP: usize = 50;
pub const NOTIFICATION_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Active,
    Busy,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AgentStats {
    #[serde(default)]
    pub current: u32,
    #[serde(default)]
    pub queued: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub position: Point,
    pub radius: f32,
    pub status: AgentStatus,
    pub stats: AgentStats,
    /// Result of the last task completed against this agent, for the side panel.
    pub last_result: Option<String>,
    pub pulse_phase: f32,
    pub has_saved_position: bool,
}

impl Agent {
    pub fn new(name: impl Into<String>, position: Point) -> Self {
        Self {
            name: name.into(),
            position,
            radius: crate::graph::AGENT_RADIUS,
            status: AgentStatus::Idle,
            stats: AgentStats::default(),
            last_result: None,
            pulse_phase: 0.0,
            has_saved_position: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub from: String,
    pub to: String,
    pub description: String,
    pub status: TaskStatus,
    /// Server-reported progress in percent, if the backend emits it.
    pub progress: Option<f32>,
    /// Progress actually rendered; eased toward `progress` by the animator.
    pub shown_progress: f32,
    pub result: Option<String>,
    pub error: Option<String>,
    pub input_task_ids: Vec<String>,
    /// None until the first prepared frame lays the card out; stable afterwards.
    pub position: Option<Point>,
    /// Card bounds as of the last prepared frame, used for hit-testing.
    pub bounds: Option<Rectangle>,
    pub log: VecDeque<LogLine>,
}

impl Task {
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            progress: None,
            shown_progress: 0.0,
            result: None,
            error: None,
            input_task_ids: Vec::new(),
            position: None,
            bounds: None,
            log: VecDeque::new(),
        }
    }

    pub fn push_log(&mut self, text: impl Into<String>) {
        if self.log.len() >= TASK_LOG_CAP {
            self.log.pop_front();
        }
        self.log.push_back(LogLine {
            at: Utc::now(),
            text: text.into(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinerKind {
    Merge,
    Append,
    Summarize,
    Compare,
    Vote,
}

pub struct KindInfo {
    pub label: &'static str,
    pub icon: &'static str,
    pub color: Color,
    pub default_instruction: &'static str,
}

// Kind configuration is a flat lookup table; there is no behavior behind it.
static MERGE_INFO: KindInfo = KindInfo {
    label: "Merge",
    icon: "⊕",
    color: Color::from_rgb(0.35, 0.65, 0.90),
    default_instruction: "Merge the inputs into a single coherent result.",
};
static APPEND_INFO: KindInfo = KindInfo {
    label: "Append",
    icon: "∥",
    color: Color::from_rgb(0.45, 0.80, 0.55),
    default_instruction: "Concatenate the inputs in order.",
};
static SUMMARIZE_INFO: KindInfo = KindInfo {
    label: "Summarize",
    icon: "Σ",
    color: Color::from_rgb(0.90, 0.70, 0.30),
    default_instruction: "Summarize the inputs into a short digest.",
};
static COMPARE_INFO: KindInfo = KindInfo {
    label: "Compare",
    icon: "⇄",
    color: Color::from_rgb(0.80, 0.50, 0.85),
    default_instruction: "Compare the inputs and report the differences.",
};
static VOTE_INFO: KindInfo = KindInfo {
    label: "Vote",
    icon: "✓",
    color: Color::from_rgb(0.90, 0.45, 0.40),
    default_instruction: "Pick the best input by majority criteria.",
};

impl CombinerKind {
    pub const ALL: [CombinerKind; 5] = [
        CombinerKind::Merge,
        CombinerKind::Append,
        CombinerKind::Summarize,
        CombinerKind::Compare,
        CombinerKind::Vote,
    ];

    pub fn info(self) -> &'static KindInfo {
        match self {
            CombinerKind::Merge => &MERGE_INFO,
            CombinerKind::Append => &APPEND_INFO,
            CombinerKind::Summarize => &SUMMARIZE_INFO,
            CombinerKind::Compare => &COMPARE_INFO,
            CombinerKind::Vote => &VOTE_INFO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPort {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct CombinerNode {
    pub id: String,
    pub kind: CombinerKind,
    pub position: Point,
    pub size: Size,
    pub input_ports: Vec<InputPort>,
    /// Backend task executing this combiner, once its output has been wired.
    pub task_id: Option<String>,
}

impl CombinerNode {
    pub fn new(id: impl Into<String>, kind: CombinerKind, position: Point) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            size: Size::new(crate::graph::COMBINER_WIDTH, crate::graph::COMBINER_HEIGHT),
            input_ports: Vec::new(),
            task_id: None,
        }
    }
}

pub const OUTPUT_PORT: &str = "output";
pub const INPUT_PORT: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: String,
    pub from_node: String,
    pub from_port: String,
    pub to_node: String,
    pub to_port: String,
    pub color: usize,
    pub animated: bool,
}

#[derive(Debug, Clone)]
pub struct Particle {
    pub start: Point,
    pub target: Point,
    pub progress: f32,
    pub speed: f32,
    pub alpha: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub from_task: String,
    pub to_task: String,
    pub active: bool,
    pub completed: bool,
    pub failed: bool,
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PanelState {
    pub width: f32,
    pub target: f32,
    pub animating: bool,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            width: 0.0,
            target: 0.0,
            animating: false,
        }
    }
}

impl PanelState {
    pub fn open_to(&mut self, target: f32) {
        if (self.target - target).abs() > f32::EPSILON {
            self.target = target;
            self.animating = true;
        }
    }

    pub fn close(&mut self) {
        self.open_to(0.0);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Panels {
    pub task: PanelState,
    pub agent: PanelState,
    pub combiner: PanelState,
    pub timeline: PanelState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Agent(String),
    Task(String),
    Combiner(String),
}

/// An assignment drag requested by a side panel, picked up by the canvas on
/// the next pointer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAssignment {
    Task(String),
    CombinerOutput(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskMetrics {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Everything the engine renders and mutates. One instance, owned by the app;
/// hit-testing, the drag machine, the reconciler, and the animator all borrow it.
pub struct WorkspaceState {
    pub workspace_id: String,
    pub mission: String,
    pub progress: f32,
    pub agents: HashMap<String, Agent>,
    pub tasks: Vec<Task>,
    pub combiners: Vec<CombinerNode>,
    pub connections: Vec<Connection>,
    pub chains: Vec<Chain>,
    pub flow_particles: Vec<Particle>,
    pub chain_particles: Vec<Particle>,
    pub timeline: VecDeque<TimelineEvent>,
    pub notifications: VecDeque<String>,
    pub camera: Camera,
    pub panels: Panels,
    pub selection: Selection,
    pub pending_assignment: Option<PendingAssignment>,
    pub cache: canvas::Cache,
    next_connection_seq: u64,
    next_combiner_seq: u64,
    next_local_task_seq: u64,
}

impl WorkspaceState {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            mission: String::new(),
            progress: 0.0,
            agents: HashMap::new(),
            tasks: Vec::new(),
            combiners: Vec::new(),
            connections: Vec::new(),
            chains: Vec::new(),
            flow_particles: Vec::new(),
            chain_particles: Vec::new(),
            timeline: VecDeque::new(),
            notifications: VecDeque::new(),
            camera: Camera::default(),
            panels: Panels::default(),
            selection: Selection::None,
            pending_assignment: None,
            cache: canvas::Cache::new(),
            next_connection_seq: 0,
            next_combiner_seq: 0,
            next_local_task_seq: 0,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn combiner(&self, id: &str) -> Option<&CombinerNode> {
        self.combiners.iter().find(|c| c.id == id)
    }

    pub fn combiner_mut(&mut self, id: &str) -> Option<&mut CombinerNode> {
        self.combiners.iter_mut().find(|c| c.id == id)
    }

    pub fn next_connection_id(&mut self) -> String {
        self.next_connection_seq += 1;
        format!("conn-{}", self.next_connection_seq)
    }

    pub fn add_combiner(&mut self, kind: CombinerKind, position: Point) -> String {
        self.next_combiner_seq += 1;
        let id = format!("combiner-{}", self.next_combiner_seq);
        self.combiners.push(CombinerNode::new(&id, kind, position));
        id
    }

    /// Keep the id sequence ahead of combiners restored from a saved layout.
    pub fn note_combiner_id(&mut self, id: &str) {
        if let Some(n) = id
            .strip_prefix("combiner-")
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.next_combiner_seq = self.next_combiner_seq.max(n);
        }
    }

    /// Optimistic insert ahead of the backend round trip. The placeholder id is
    /// swapped for the server id once the create call returns.
    pub fn insert_task_local(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        description: impl Into<String>,
    ) -> String {
        self.next_local_task_seq += 1;
        let id = format!("local-{}", self.next_local_task_seq);
        let mut task = Task::new(&id, from, to);
        task.description = description.into();
        self.tasks.push(task);
        id
    }

    pub fn remove_task(&mut self, id: &str) {
        self.tasks.retain(|t| t.id != id);
        if self.selection == Selection::Task(id.to_string()) {
            self.selection = Selection::None;
        }
    }

    pub fn metrics(&self) -> TaskMetrics {
        let mut m = TaskMetrics::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => m.pending += 1,
                TaskStatus::InProgress => m.in_progress += 1,
                TaskStatus::Completed => m.completed += 1,
                TaskStatus::Failed => m.failed += 1,
            }
        }
        m
    }

    pub fn push_timeline(&mut self, text: impl Into<String>) {
        if self.timeline.len() >= TIMELINE_CAP {
            self.timeline.pop_front();
        }
        self.timeline.push_back(TimelineEvent {
            at: Utc::now(),
            text: text.into(),
        });
    }

    pub fn push_notification(&mut self, text: impl Into<String>) {
        if self.notifications.len() >= NOTIFICATION_CAP {
            self.notifications.pop_front();
        }
        self.notifications.push_back(text.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn task_log_is_capped() {
        let mut task = Task::new("t1", "a", "b");
        for i in 0..(TASK_LOG_CAP + 10) {
            task.push_log(format!("line {i}"));
        }
        assert_eq!(task.log.len(), TASK_LOG_CAP);
        assert_eq!(task.log.front().map(|l| l.text.as_str()), Some("line 10"));
    }

    #[test]
    fn timeline_is_capped() {
        let mut state = WorkspaceState::new("ws");
        for i in 0..(TIMELINE_CAP + 5) {
            state.push_timeline(format!("event {i}"));
        }
        assert_eq!(state.timeline.len(), TIMELINE_CAP);
        assert_eq!(
            state.timeline.front().map(|e| e.text.as_str()),
            Some("event 5")
        );
    }

    #[test]
    fn metrics_count_by_status() {
        let mut state = WorkspaceState::new("ws");
        for (id, status) in [
            ("t1", TaskStatus::Pending),
            ("t2", TaskStatus::InProgress),
            ("t3", TaskStatus::InProgress),
            ("t4", TaskStatus::Failed),
        ] {
            let mut task = Task::new(id, "a", "b");
            task.status = status;
            state.tasks.push(task);
        }
        assert_eq!(
            state.metrics(),
            TaskMetrics {
                pending: 1,
                in_progress: 2,
                completed: 0,
                failed: 1,
            }
        );
    }

    #[test]
    fn kind_table_is_total() {
        for kind in CombinerKind::ALL {
            let info = kind.info();
            assert!(!info.label.is_empty());
            assert!(!info.default_instruction.is_empty());
        }
    }
}
