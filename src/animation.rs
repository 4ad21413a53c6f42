//! Frame-synchronized animation pass. Each tick advances, in order: task
//! progress easing, particle aging/culling, chain-particle spawning, agent
//! pulse phases, and panel-width tweens, then invalidates the canvas cache so
//! the next frame repaints.

use rand::Rng;

use crate::state::{PanelState, Particle, TaskStatus, WorkspaceState};

/// Pixels a side panel moves per tick.
pub const PANEL_SPEED: f32 = 24.0;
/// Percent a progress bar eases toward its target per tick.
const PROGRESS_EASE: f32 = 1.8;
/// Displayed progress creeps toward this when the server reports none.
const PROGRESS_CREEP_TARGET: f32 = 90.0;
const PULSE_STEP: f32 = 0.06;
const ALPHA_DECAY: f32 = 0.004;

const CHAIN_SPAWN_CHANCE: f64 = 0.12;
const FLOW_SPAWN_CHANCE: f64 = 0.04;

/// Owns the animation lifecycle. The frame subscription only runs while
/// `is_running()`, and `start` is a no-op when already running, so a second
/// init can never stack a duplicate loop.
#[derive(Debug, Default)]
pub struct Animator {
    running: bool,
}

impl Animator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

pub fn tick(state: &mut WorkspaceState) {
    advance_progress(state);

    age_pool(&mut state.flow_particles);
    age_pool(&mut state.chain_particles);

    spawn_chain_particles(state);
    spawn_flow_particles(state);

    for agent in state.agents.values_mut() {
        agent.pulse_phase = (agent.pulse_phase + PULSE_STEP) % std::f32::consts::TAU;
    }

    advance_panel(&mut state.panels.task);
    advance_panel(&mut state.panels.agent);
    advance_panel(&mut state.panels.combiner);
    advance_panel(&mut state.panels.timeline);

    state.cache.clear();
}

fn advance_progress(state: &mut WorkspaceState) {
    for task in &mut state.tasks {
        match task.status {
            TaskStatus::InProgress => {
                let target = task.progress.unwrap_or(PROGRESS_CREEP_TARGET);
                if task.shown_progress < target {
                    task.shown_progress = (task.shown_progress + PROGRESS_EASE).min(target);
                }
            }
            TaskStatus::Completed => task.shown_progress = 100.0,
            _ => {}
        }
    }
}

/// Progress is monotonically non-decreasing; a particle is removed in the same
/// tick its progress first reaches 1.
fn age_pool(pool: &mut Vec<Particle>) {
    for particle in pool.iter_mut() {
        particle.progress += particle.speed;
        particle.alpha = (particle.alpha - ALPHA_DECAY).max(0.0);
    }
    pool.retain(|p| p.progress < 1.0);
}

/// Spawning is probabilistic rather than scheduled, so the flow rate scales
/// naturally with the tick rate.
fn spawn_chain_particles(state: &mut WorkspaceState) {
    let mut rng = rand::thread_rng();
    let mut spawned = Vec::new();
    for chain in &state.chains {
        if !chain.active || chain.completed {
            continue;
        }
        if !rng.gen_bool(CHAIN_SPAWN_CHANCE) {
            continue;
        }
        let (Some(start), Some(target)) = (
            state.port_position(&chain.from_task, crate::state::OUTPUT_PORT),
            state.port_position(&chain.to_task, crate::state::INPUT_PORT),
        ) else {
            continue;
        };
        spawned.push(Particle {
            start,
            target,
            progress: 0.0,
            speed: rng.gen_range(0.008..0.020),
            alpha: 1.0,
        });
    }
    state.chain_particles.extend(spawned);
}

fn spawn_flow_particles(state: &mut WorkspaceState) {
    let mut rng = rand::thread_rng();
    let mut spawned = Vec::new();
    for connection in &state.connections {
        if !connection.animated {
            continue;
        }
        if !rng.gen_bool(FLOW_SPAWN_CHANCE) {
            continue;
        }
        let (Some(start), Some(target)) = (
            state.port_position(&connection.from_node, &connection.from_port),
            state.port_position(&connection.to_node, &connection.to_port),
        ) else {
            continue;
        };
        spawned.push(Particle {
            start,
            target,
            progress: 0.0,
            speed: rng.gen_range(0.006..0.016),
            alpha: 1.0,
        });
    }
    state.flow_particles.extend(spawned);
}

fn advance_panel(panel: &mut PanelState) {
    if !panel.animating {
        return;
    }
    let delta = panel.target - panel.width;
    if delta.abs() <= PANEL_SPEED {
        panel.width = panel.target;
        panel.animating = false;
    } else {
        panel.width += PANEL_SPEED * delta.signum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced::Point;
    use pretty_assertions::assert_eq;

    fn particle(progress: f32, speed: f32) -> Particle {
        Particle {
            start: Point::new(0.0, 0.0),
            target: Point::new(100.0, 0.0),
            progress,
            speed,
            alpha: 1.0,
        }
    }

    #[test]
    fn particle_progress_is_monotonic() {
        let mut pool = vec![particle(0.0, 0.01)];
        let mut last = 0.0;
        for _ in 0..50 {
            age_pool(&mut pool);
            let current = pool[0].progress;
            assert!(current > last);
            last = current;
        }
    }

    #[test]
    fn particle_is_culled_the_tick_it_reaches_one() {
        let mut pool = vec![particle(0.95, 0.1), particle(0.5, 0.01)];
        age_pool(&mut pool);
        assert_eq!(pool.len(), 1);
        assert!(pool[0].progress < 1.0);
    }

    #[test]
    fn panel_tween_arrives_and_clears_flag() {
        let mut panel = PanelState::default();
        panel.open_to(50.0);
        assert!(panel.animating);

        advance_panel(&mut panel);
        assert_eq!(panel.width, PANEL_SPEED);
        advance_panel(&mut panel);
        advance_panel(&mut panel);
        assert_eq!(panel.width, 50.0);
        assert!(!panel.animating);

        // Settled panels do not move.
        advance_panel(&mut panel);
        assert_eq!(panel.width, 50.0);
    }

    #[test]
    fn panel_tween_closes_back_down() {
        let mut panel = PanelState {
            width: 40.0,
            target: 40.0,
            animating: false,
        };
        panel.close();
        advance_panel(&mut panel);
        advance_panel(&mut panel);
        assert_eq!(panel.width, 0.0);
        assert!(!panel.animating);
    }

    #[test]
    fn animator_start_is_idempotent() {
        let mut animator = Animator::new();
        animator.start();
        animator.start();
        assert!(animator.is_running());
        animator.stop();
        assert!(!animator.is_running());
    }

    #[test]
    fn shown_progress_eases_toward_server_value() {
        let mut state = WorkspaceState::new("ws");
        let mut task = crate::state::Task::new("t1", "a", "b");
        task.status = TaskStatus::InProgress;
        task.progress = Some(10.0);
        state.tasks.push(task);

        for _ in 0..20 {
            advance_progress(&mut state);
        }
        assert_eq!(state.task("t1").unwrap().shown_progress, 10.0);

        state.task_mut("t1").unwrap().status = TaskStatus::Completed;
        advance_progress(&mut state);
        assert_eq!(state.task("t1").unwrap().shown_progress, 100.0);
    }
}
