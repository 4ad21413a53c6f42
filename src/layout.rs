//! First-render placement for unpositioned nodes and the persisted layout
//! document the backend stores per workspace.

use std::collections::HashMap;

use iced::Point;
use serde::{Deserialize, Serialize};

use crate::state::{Agent, CombinerKind, CombinerNode, Task, WorkspaceState};

const AGENT_COLUMN_X: f32 = 140.0;
const TASK_COLUMN_X: f32 = 460.0;
const INITIAL_Y: f32 = 80.0;
const ROW_SPACING: f32 = 130.0;
const NUDGE: f32 = 28.0;

/// Column placement for an agent the server introduced without a saved
/// position: scan down the left column for a free row.
pub fn place_agent(existing: &HashMap<String, Agent>) -> Point {
    for row in 0..50 {
        let candidate = Point::new(AGENT_COLUMN_X, INITIAL_Y + row as f32 * ROW_SPACING);
        let overlaps = existing.values().any(|agent| {
            let dx = (agent.position.x - candidate.x).abs();
            let dy = (agent.position.y - candidate.y).abs();
            dx < ROW_SPACING * 0.8 && dy < ROW_SPACING * 0.6
        });
        if !overlaps {
            return candidate;
        }
    }
    Point::new(AGENT_COLUMN_X, INITIAL_Y)
}

/// First-render position for a task card: midway between its endpoint agents
/// when both are known, otherwise a free row in the task column. Cached on the
/// task afterwards, so the card stays put.
pub fn place_task(state: &WorkspaceState, task: &Task) -> Point {
    let from = state.agents.get(&task.from).map(|a| a.position);
    let to = state.agents.get(&task.to).map(|a| a.position);

    let candidate = match (from, to) {
        (Some(a), Some(b)) => Point::new(
            (a.x + b.x) / 2.0 - crate::graph::TASK_WIDTH / 2.0,
            (a.y + b.y) / 2.0 - crate::graph::TASK_HEIGHT / 2.0,
        ),
        (Some(a), None) | (None, Some(a)) => {
            Point::new(a.x + 90.0, a.y - crate::graph::TASK_HEIGHT / 2.0)
        }
        (None, None) => Point::new(TASK_COLUMN_X, INITIAL_Y),
    };

    let taken: Vec<Point> = state.tasks.iter().filter_map(|t| t.position).collect();
    find_non_overlapping(candidate, &taken)
}

fn find_non_overlapping(mut candidate: Point, taken: &[Point]) -> Point {
    for _ in 0..20 {
        let overlaps = taken.iter().any(|p| {
            (p.x - candidate.x).abs() < crate::graph::TASK_WIDTH * 0.5
                && (p.y - candidate.y).abs() < crate::graph::TASK_HEIGHT * 0.8
        });
        if !overlaps {
            break;
        }
        candidate.x += NUDGE;
        candidate.y += NUDGE;
    }
    candidate
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SavedPosition {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedCombiner {
    pub id: String,
    pub kind: CombinerKind,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedConnection {
    pub from_node: String,
    pub from_port: String,
    pub to_node: String,
    pub to_port: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SavedCamera {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Default for SavedCamera {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
        }
    }
}

/// Per-workspace layout document: saved whenever a drag ends or a
/// connection/combiner is created or deleted, loaded once at init and merged
/// onto the freshly fetched agent/task lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutDoc {
    #[serde(default)]
    pub agents: HashMap<String, SavedPosition>,
    #[serde(default)]
    pub tasks: HashMap<String, SavedPosition>,
    #[serde(default)]
    pub combiners: Vec<SavedCombiner>,
    #[serde(default)]
    pub connections: Vec<SavedConnection>,
    #[serde(default)]
    pub camera: SavedCamera,
}

pub fn collect_layout(state: &WorkspaceState) -> LayoutDoc {
    LayoutDoc {
        agents: state
            .agents
            .values()
            .map(|a| {
                (
                    a.name.clone(),
                    SavedPosition {
                        x: a.position.x,
                        y: a.position.y,
                    },
                )
            })
            .collect(),
        tasks: state
            .tasks
            .iter()
            .filter_map(|t| {
                t.position.map(|p| {
                    (
                        t.id.clone(),
                        SavedPosition { x: p.x, y: p.y },
                    )
                })
            })
            .collect(),
        combiners: state
            .combiners
            .iter()
            .map(|c| SavedCombiner {
                id: c.id.clone(),
                kind: c.kind,
                x: c.position.x,
                y: c.position.y,
                task_id: c.task_id.clone(),
            })
            .collect(),
        connections: state
            .connections
            .iter()
            .map(|c| SavedConnection {
                from_node: c.from_node.clone(),
                from_port: c.from_port.clone(),
                to_node: c.to_node.clone(),
                to_port: c.to_port.clone(),
            })
            .collect(),
        camera: SavedCamera {
            x: state.camera.offset.x,
            y: state.camera.offset.y,
            scale: state.camera.scale,
        },
    }
}

/// Merge a saved layout onto freshly fetched state. Positions apply only to
/// entities that still exist; combiners and connections are rebuilt through
/// the connection manager so port bookkeeping stays consistent.
pub fn apply_layout(state: &mut WorkspaceState, doc: &LayoutDoc) {
    for (name, saved) in &doc.agents {
        if let Some(agent) = state.agents.get_mut(name) {
            agent.position = Point::new(saved.x, saved.y);
            agent.has_saved_position = true;
        }
    }
    for (id, saved) in &doc.tasks {
        if let Some(task) = state.task_mut(id) {
            task.position = Some(Point::new(saved.x, saved.y));
        }
    }

    for saved in &doc.combiners {
        if state.combiner(&saved.id).is_none() {
            let mut combiner =
                CombinerNode::new(&saved.id, saved.kind, Point::new(saved.x, saved.y));
            combiner.task_id = saved.task_id.clone();
            state.combiners.push(combiner);
        }
        state.note_combiner_id(&saved.id);
    }

    for saved in &doc.connections {
        state.create_connection(
            &saved.from_node,
            &saved.from_port,
            &saved.to_node,
            &saved.to_port,
        );
    }

    state.camera.offset = iced::Vector::new(doc.camera.x, doc.camera.y);
    state.camera.scale = doc.camera.scale;
    state.camera.clamp_scale();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskStatus;
    use pretty_assertions::assert_eq;

    fn seeded_state() -> WorkspaceState {
        let mut state = WorkspaceState::new("ws");
        state
            .agents
            .insert("a".to_string(), Agent::new("a", Point::new(100.0, 200.0)));
        state
            .agents
            .insert("b".to_string(), Agent::new("b", Point::new(500.0, 200.0)));
        let mut task = Task::new("t1", "a", "b");
        task.status = TaskStatus::Pending;
        state.tasks.push(task);
        state
    }

    #[test]
    fn place_task_prefers_endpoint_midpoint() {
        let state = seeded_state();
        let task = state.task("t1").unwrap();
        let placed = place_task(&state, task);
        assert_eq!(placed.x, 300.0 - crate::graph::TASK_WIDTH / 2.0);
        assert_eq!(placed.y, 200.0 - crate::graph::TASK_HEIGHT / 2.0);
    }

    #[test]
    fn place_task_nudges_off_occupied_spots() {
        let mut state = seeded_state();
        let first = {
            let task = state.task("t1").unwrap();
            place_task(&state, task)
        };
        state.task_mut("t1").unwrap().position = Some(first);

        let mut second_task = Task::new("t2", "a", "b");
        second_task.position = None;
        state.tasks.push(second_task);
        let second = {
            let task = state.task("t2").unwrap();
            place_task(&state, task)
        };
        assert!(second != first);
    }

    #[test]
    fn place_agent_stacks_down_the_column() {
        let mut agents = HashMap::new();
        let first = place_agent(&agents);
        agents.insert("a".to_string(), Agent::new("a", first));
        let second = place_agent(&agents);
        assert_eq!(first.x, second.x);
        assert!(second.y > first.y);
    }

    #[test]
    fn layout_round_trips_through_the_document() {
        let mut state = seeded_state();
        state.task_mut("t1").unwrap().position = Some(Point::new(321.0, 123.0));
        let combiner_id =
            state.add_combiner(crate::state::CombinerKind::Vote, Point::new(50.0, 60.0));
        state.create_connection("t1", "output", &combiner_id, "input-0");
        state.camera.offset = iced::Vector::new(15.0, -20.0);
        state.camera.scale = 1.5;

        let doc = collect_layout(&state);

        // A fresh fetch of the same workspace, before layout merge.
        let mut fresh = seeded_state();
        apply_layout(&mut fresh, &doc);

        assert_eq!(
            fresh.task("t1").unwrap().position,
            Some(Point::new(321.0, 123.0))
        );
        assert_eq!(fresh.combiners.len(), 1);
        assert_eq!(fresh.connections.len(), 1);
        assert_eq!(fresh.connections[0].to_port, "input-0");
        assert_eq!(fresh.camera.scale, 1.5);
        assert!(fresh.agents["a"].has_saved_position);
    }

    #[test]
    fn applied_camera_scale_is_clamped() {
        let mut state = WorkspaceState::new("ws");
        let doc = LayoutDoc {
            camera: SavedCamera {
                x: 0.0,
                y: 0.0,
                scale: 9.0,
            },
            ..LayoutDoc::default()
        };
        apply_layout(&mut state, &doc);
        assert_eq!(state.camera.scale, crate::graph::MAX_ZOOM);
    }

    #[test]
    fn layout_ignores_entities_that_no_longer_exist() {
        let mut doc = LayoutDoc::default();
        doc.tasks.insert(
            "gone".to_string(),
            SavedPosition { x: 1.0, y: 2.0 },
        );
        doc.agents.insert(
            "ghost".to_string(),
            SavedPosition { x: 3.0, y: 4.0 },
        );
        let mut state = seeded_state();
        apply_layout(&mut state, &doc);
        assert!(state.task("gone").is_none());
        assert!(!state.agents.contains_key("ghost"));
    }
}
