use iced::mouse;
use iced::widget::canvas::{self, Frame, Geometry, Path, Stroke, Text};
use iced::{Color, Point, Rectangle, Size, Vector};

use crate::Message;
use crate::layout;
use crate::state::{
    Agent, AgentStatus, CombinerKind, CombinerNode, Connection, PendingAssignment, Task,
    TaskStatus, WorkspaceState,
};

pub const AGENT_RADIUS: f32 = 34.0;
pub const TASK_WIDTH: f32 = 172.0;
pub const TASK_HEIGHT: f32 = 64.0;
pub const COMBINER_WIDTH: f32 = 150.0;
pub const COMBINER_HEIGHT: f32 = 56.0;
pub const PORT_RADIUS: f32 = 6.0;

const PORT_HIT_RADIUS: f32 = 14.0;
const CONNECTION_HIT_DISTANCE: f32 = 8.0;

pub const MIN_ZOOM: f32 = 0.5;
pub const MAX_ZOOM: f32 = 2.0;
const ZOOM_IN: f32 = 1.1;
const ZOOM_OUT: f32 = 0.9;

/// Pan/zoom transform between screen and world space.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub offset: Vector,
    pub scale: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            offset: Vector::new(0.0, 0.0),
            scale: 1.0,
        }
    }
}

impl Camera {
    pub fn to_world(&self, point: Point) -> Point {
        Point::new(
            (point.x - self.offset.x) / self.scale,
            (point.y - self.offset.y) / self.scale,
        )
    }

    pub fn to_screen(&self, point: Point) -> Point {
        Point::new(
            point.x * self.scale + self.offset.x,
            point.y * self.scale + self.offset.y,
        )
    }

    /// One multiplicative zoom step per wheel tick, clamped after each
    /// multiplication, keeping the world point under the cursor fixed.
    pub fn zoom_at(&mut self, steps: f32, cursor: Point) {
        if steps == 0.0 {
            return;
        }
        let factor = if steps > 0.0 { ZOOM_IN } else { ZOOM_OUT };
        let old = self.scale;
        self.scale = (self.scale * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let world_x = (cursor.x - self.offset.x) / old;
        let world_y = (cursor.y - self.offset.y) / old;
        self.offset.x = cursor.x - world_x * self.scale;
        self.offset.y = cursor.y - world_y * self.scale;
    }

    pub fn clamp_scale(&mut self) {
        self.scale = self.scale.clamp(MIN_ZOOM, MAX_ZOOM);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HitResult {
    None,
    Task(String),
    Agent(String),
    Port { node: String, port: String },
    Combiner(String),
    Connection(String),
}

/// Messages the canvas publishes into the app update loop.
#[derive(Debug, Clone)]
pub enum CanvasMessage {
    AgentDragged { name: String, position: Point },
    TaskDragged { id: String, position: Point },
    CombinerDragged { id: String, position: Point },
    DragEnded,
    Panned { offset: Vector },
    Zoomed { steps: f32, cursor: Point },
    ConnectionMade {
        from_node: String,
        from_port: String,
        to_node: String,
        to_port: String,
    },
    ConnectionCancelled,
    ConnectionDeleted(String),
    CombinerDeleted(String),
    CombinerRequested { kind: CombinerKind, position: Point },
    NewTaskFrom(String),
    AgentClicked(String),
    TaskClicked(String),
    CombinerClicked(String),
    AssignTask { task_id: String, agent: String },
    AssignCombiner { combiner_id: String, agent: String },
    AssignmentCancelled,
    TimelineToggled,
    EscapePressed,
}

pub fn port_is_input(port_id: &str) -> bool {
    port_id == crate::state::INPUT_PORT || crate::connections::input_index(port_id).is_some()
}

fn combiner_input_slot(combiner: &CombinerNode, index: usize, slots: usize) -> Point {
    let step = combiner.size.width / (slots as f32 + 1.0);
    Point::new(
        combiner.position.x + step * (index as f32 + 1.0),
        combiner.position.y,
    )
}

fn task_rect(task: &Task) -> Option<Rectangle> {
    task.bounds.or_else(|| {
        task.position
            .map(|p| Rectangle::new(p, Size::new(TASK_WIDTH, TASK_HEIGHT)))
    })
}

impl WorkspaceState {
    /// The one resolver for port coordinates. Drawing, the drag preview, and
    /// hit-testing all go through here; duplicating this math would let
    /// connections drift away from their hit targets.
    pub fn port_position(&self, node_id: &str, port_id: &str) -> Option<Point> {
        if let Some(agent) = self.agents.get(node_id) {
            return match port_id {
                crate::state::INPUT_PORT => Some(Point::new(
                    agent.position.x,
                    agent.position.y - agent.radius,
                )),
                crate::state::OUTPUT_PORT => Some(Point::new(
                    agent.position.x,
                    agent.position.y + agent.radius,
                )),
                _ => None,
            };
        }
        if let Some(task) = self.task(node_id) {
            let rect = task_rect(task)?;
            return match port_id {
                crate::state::INPUT_PORT => Some(Point::new(rect.x + rect.width / 2.0, rect.y)),
                crate::state::OUTPUT_PORT => {
                    Some(Point::new(rect.x + rect.width / 2.0, rect.y + rect.height))
                }
                _ => None,
            };
        }
        if let Some(combiner) = self.combiner(node_id) {
            if port_id == crate::state::OUTPUT_PORT {
                return Some(Point::new(
                    combiner.position.x + combiner.size.width / 2.0,
                    combiner.position.y + combiner.size.height,
                ));
            }
            // The numeric suffix is authoritative for slot placement even if
            // the port sits elsewhere in the combiner's own list.
            let index = crate::connections::input_index(port_id)?;
            let slots = combiner.input_ports.len().max(index + 1).max(1);
            return Some(combiner_input_slot(combiner, index, slots));
        }
        None
    }

    /// Hit order is the draw order from topmost down: task cards, agent
    /// bodies, combiner ports, combiner bodies, then connections (the last
    /// two feed hover/delete affordances and panning decisions).
    pub fn hit_test(&self, screen_point: Point) -> HitResult {
        let world = self.camera.to_world(screen_point);

        for task in self.tasks.iter().rev() {
            if let Some(rect) = task_rect(task) {
                if rect.contains(world) {
                    return HitResult::Task(task.id.clone());
                }
            }
        }

        for agent in self.agents.values() {
            let dx = world.x - agent.position.x;
            let dy = world.y - agent.position.y;
            if (dx * dx + dy * dy).sqrt() <= agent.radius {
                return HitResult::Agent(agent.name.clone());
            }
        }

        for combiner in self.combiners.iter().rev() {
            let slots = combiner.input_ports.len().max(2);
            for index in 0..slots {
                let slot = combiner_input_slot(combiner, index, slots);
                let dx = world.x - slot.x;
                let dy = world.y - slot.y;
                if (dx * dx + dy * dy).sqrt() <= PORT_HIT_RADIUS {
                    return HitResult::Port {
                        node: combiner.id.clone(),
                        port: crate::connections::input_port_id(index),
                    };
                }
            }
            let output = Point::new(
                combiner.position.x + combiner.size.width / 2.0,
                combiner.position.y + combiner.size.height,
            );
            let dx = world.x - output.x;
            let dy = world.y - output.y;
            if (dx * dx + dy * dy).sqrt() <= PORT_HIT_RADIUS {
                return HitResult::Port {
                    node: combiner.id.clone(),
                    port: crate::state::OUTPUT_PORT.to_string(),
                };
            }
        }

        for combiner in self.combiners.iter().rev() {
            let rect = Rectangle::new(combiner.position, combiner.size);
            if rect.contains(world) {
                return HitResult::Combiner(combiner.id.clone());
            }
        }

        for connection in &self.connections {
            if let Some(distance) = self.distance_to_connection(world, connection) {
                if distance < CONNECTION_HIT_DISTANCE {
                    return HitResult::Connection(connection.id.clone());
                }
            }
        }

        HitResult::None
    }

    fn distance_to_connection(&self, point: Point, connection: &Connection) -> Option<f32> {
        let start = self.port_position(&connection.from_node, &connection.from_port)?;
        let end = self.port_position(&connection.to_node, &connection.to_port)?;
        let offset = ((end.y - start.y).abs() / 2.0).max(40.0);
        let ctrl1 = Point::new(start.x, start.y + offset);
        let ctrl2 = Point::new(end.x, end.y - offset);

        let mut min_distance = f32::MAX;
        for i in 0..=20 {
            let t = i as f32 / 20.0;
            let sample = cubic_bezier(start, ctrl1, ctrl2, end, t);
            let dx = point.x - sample.x;
            let dy = point.y - sample.y;
            min_distance = min_distance.min((dx * dx + dy * dy).sqrt());
        }
        Some(min_distance)
    }

    /// Resolve what a connection drag released at `screen_point` should attach
    /// to. Ports win; task cards and agent bodies act as their implicit
    /// input/output anchors.
    pub fn connection_target(
        &self,
        screen_point: Point,
        want_input: bool,
    ) -> Option<(String, String)> {
        match self.hit_test(screen_point) {
            HitResult::Port { node, port } => {
                (port_is_input(&port) == want_input).then_some((node, port))
            }
            HitResult::Task(id) => {
                let port = if want_input {
                    crate::state::INPUT_PORT
                } else {
                    crate::state::OUTPUT_PORT
                };
                Some((id, port.to_string()))
            }
            HitResult::Agent(name) => {
                let port = if want_input {
                    crate::state::INPUT_PORT
                } else {
                    crate::state::OUTPUT_PORT
                };
                Some((name, port.to_string()))
            }
            _ => None,
        }
    }

    /// Runs on the update path immediately before a redraw is requested:
    /// defensive port sweep, first-render task placement, bounds stamping.
    pub fn prepare_frame(&mut self) {
        self.normalize_ports();

        let unplaced: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| t.position.is_none())
            .map(|t| t.id.clone())
            .collect();
        for id in unplaced {
            let position = self.task(&id).map(|task| layout::place_task(self, task));
            if let (Some(position), Some(task)) = (position, self.task_mut(&id)) {
                task.position = Some(position);
            }
        }

        for task in &mut self.tasks {
            if let Some(position) = task.position {
                task.bounds = Some(Rectangle::new(position, Size::new(TASK_WIDTH, TASK_HEIGHT)));
            }
        }
    }
}

/// Mutually exclusive pointer session. A single enum: holding two drags at
/// once is unrepresentable.
#[derive(Debug, Clone, Default)]
pub enum DragSession {
    #[default]
    Idle,
    PanningCanvas { anchor: Vector },
    DraggingAgent { name: String, moved: bool },
    DraggingTask { id: String, moved: bool },
    DraggingCombiner { id: String, moved: bool },
    DraggingConnection {
        from_node: String,
        from_port: String,
        pointer: Point,
    },
    AssigningTask { task_id: String, pointer: Point },
    AssigningToCombiner { combiner_id: String, pointer: Point },
}

/// Canvas-local interaction state. Modifier keys are plain flags: they shape
/// the cursor, never the transitions.
#[derive(Debug, Clone, Default)]
pub struct InteractionState {
    pub session: DragSession,
    pub space_held: bool,
    pub ctrl_held: bool,
}

impl canvas::Program<Message> for WorkspaceState {
    type State = InteractionState;

    fn update(
        &self,
        state: &mut Self::State,
        event: &iced::Event,
        bounds: Rectangle,
        cursor: mouse::Cursor,
    ) -> Option<canvas::Action<Message>> {
        let cursor_position = cursor.position_in(bounds)?;
        let publish = |m: CanvasMessage| Some(canvas::Action::publish(Message::Canvas(m)));

        match event {
            iced::Event::Mouse(mouse_event) => match mouse_event {
                mouse::Event::ButtonPressed(mouse::Button::Left) => {
                    if let Some(pending) = &self.pending_assignment {
                        state.session = match pending {
                            PendingAssignment::Task(task_id) => DragSession::AssigningTask {
                                task_id: task_id.clone(),
                                pointer: cursor_position,
                            },
                            PendingAssignment::CombinerOutput(combiner_id) => {
                                DragSession::AssigningToCombiner {
                                    combiner_id: combiner_id.clone(),
                                    pointer: cursor_position,
                                }
                            }
                        };
                        return Some(canvas::Action::request_redraw());
                    }
                    match self.hit_test(cursor_position) {
                        HitResult::Task(id) => {
                            state.session = DragSession::DraggingTask { id, moved: false };
                            Some(canvas::Action::request_redraw())
                        }
                        HitResult::Agent(name) => {
                            state.session = DragSession::DraggingAgent { name, moved: false };
                            Some(canvas::Action::request_redraw())
                        }
                        HitResult::Port { node, port } => {
                            state.session = DragSession::DraggingConnection {
                                from_node: node,
                                from_port: port,
                                pointer: cursor_position,
                            };
                            Some(canvas::Action::request_redraw())
                        }
                        HitResult::Combiner(id) => {
                            state.session = DragSession::DraggingCombiner { id, moved: false };
                            Some(canvas::Action::request_redraw())
                        }
                        HitResult::Connection(_) | HitResult::None => {
                            state.session = DragSession::PanningCanvas {
                                anchor: Vector::new(
                                    cursor_position.x - self.camera.offset.x,
                                    cursor_position.y - self.camera.offset.y,
                                ),
                            };
                            Some(canvas::Action::request_redraw())
                        }
                    }
                }
                mouse::Event::ButtonPressed(mouse::Button::Right) => {
                    match self.hit_test(cursor_position) {
                        HitResult::Connection(id) => publish(CanvasMessage::ConnectionDeleted(id)),
                        HitResult::Combiner(id) => publish(CanvasMessage::CombinerDeleted(id)),
                        _ => None,
                    }
                }
                mouse::Event::ButtonReleased(mouse::Button::Left) => {
                    match std::mem::take(&mut state.session) {
                        DragSession::DraggingAgent { name, moved: false } => {
                            publish(CanvasMessage::AgentClicked(name))
                        }
                        DragSession::DraggingTask { id, moved: false } => {
                            publish(CanvasMessage::TaskClicked(id))
                        }
                        DragSession::DraggingCombiner { id, moved: false } => {
                            publish(CanvasMessage::CombinerClicked(id))
                        }
                        DragSession::DraggingAgent { .. }
                        | DragSession::DraggingTask { .. }
                        | DragSession::DraggingCombiner { .. }
                        | DragSession::PanningCanvas { .. } => publish(CanvasMessage::DragEnded),
                        DragSession::DraggingConnection {
                            from_node,
                            from_port,
                            ..
                        } => {
                            let want_input = !port_is_input(&from_port);
                            match self.connection_target(cursor_position, want_input) {
                                Some((to_node, to_port)) => publish(CanvasMessage::ConnectionMade {
                                    from_node,
                                    from_port,
                                    to_node,
                                    to_port,
                                }),
                                None => publish(CanvasMessage::ConnectionCancelled),
                            }
                        }
                        DragSession::AssigningTask { task_id, .. } => {
                            match self.hit_test(cursor_position) {
                                HitResult::Agent(agent) => {
                                    publish(CanvasMessage::AssignTask { task_id, agent })
                                }
                                _ => publish(CanvasMessage::AssignmentCancelled),
                            }
                        }
                        DragSession::AssigningToCombiner { combiner_id, .. } => {
                            match self.hit_test(cursor_position) {
                                HitResult::Agent(agent) => {
                                    publish(CanvasMessage::AssignCombiner { combiner_id, agent })
                                }
                                _ => publish(CanvasMessage::AssignmentCancelled),
                            }
                        }
                        DragSession::Idle => Some(canvas::Action::request_redraw()),
                    }
                }
                mouse::Event::CursorMoved { .. } => {
                    let world = self.camera.to_world(cursor_position);
                    match &mut state.session {
                        DragSession::DraggingAgent { name, moved } => {
                            *moved = true;
                            let name = name.clone();
                            publish(CanvasMessage::AgentDragged {
                                name,
                                position: world,
                            })
                        }
                        DragSession::DraggingTask { id, moved } => {
                            *moved = true;
                            let id = id.clone();
                            publish(CanvasMessage::TaskDragged {
                                id,
                                position: world,
                            })
                        }
                        DragSession::DraggingCombiner { id, moved } => {
                            *moved = true;
                            let id = id.clone();
                            publish(CanvasMessage::CombinerDragged {
                                id,
                                position: world,
                            })
                        }
                        DragSession::PanningCanvas { anchor } => {
                            let offset = Vector::new(
                                cursor_position.x - anchor.x,
                                cursor_position.y - anchor.y,
                            );
                            publish(CanvasMessage::Panned { offset })
                        }
                        DragSession::DraggingConnection { pointer, .. }
                        | DragSession::AssigningTask { pointer, .. }
                        | DragSession::AssigningToCombiner { pointer, .. } => {
                            *pointer = cursor_position;
                            Some(canvas::Action::request_redraw())
                        }
                        DragSession::Idle => None,
                    }
                }
                mouse::Event::WheelScrolled { delta } => {
                    let steps = match delta {
                        mouse::ScrollDelta::Lines { y, .. } => *y,
                        mouse::ScrollDelta::Pixels { y, .. } => *y / 100.0,
                    };
                    publish(CanvasMessage::Zoomed {
                        steps,
                        cursor: cursor_position,
                    })
                }
                _ => None,
            },
            iced::Event::Keyboard(iced::keyboard::Event::KeyPressed { key, .. }) => {
                use iced::keyboard::Key;
                use iced::keyboard::key::Named;

                match key.as_ref() {
                    Key::Named(Named::Escape) => {
                        if matches!(state.session, DragSession::Idle) {
                            publish(CanvasMessage::EscapePressed)
                        } else {
                            state.session = DragSession::Idle;
                            publish(CanvasMessage::AssignmentCancelled)
                        }
                    }
                    Key::Named(Named::Space) => {
                        state.space_held = true;
                        None
                    }
                    Key::Named(Named::Control) => {
                        state.ctrl_held = true;
                        None
                    }
                    Key::Character(c) => {
                        let world = self.camera.to_world(cursor_position);
                        match c {
                            "1" | "2" | "3" | "4" | "5" => {
                                let index = (c.as_bytes()[0] - b'1') as usize;
                                publish(CanvasMessage::CombinerRequested {
                                    kind: CombinerKind::ALL[index],
                                    position: world,
                                })
                            }
                            "n" => match self.hit_test(cursor_position) {
                                HitResult::Agent(name) => publish(CanvasMessage::NewTaskFrom(name)),
                                _ => None,
                            },
                            "t" => publish(CanvasMessage::TimelineToggled),
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }
            iced::Event::Keyboard(iced::keyboard::Event::KeyReleased { key, .. }) => {
                use iced::keyboard::Key;
                use iced::keyboard::key::Named;

                match key.as_ref() {
                    Key::Named(Named::Space) => state.space_held = false,
                    Key::Named(Named::Control) => state.ctrl_held = false,
                    _ => {}
                }
                None
            }
            _ => None,
        }
    }

    fn draw(
        &self,
        state: &Self::State,
        renderer: &iced::Renderer,
        _theme: &iced::Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let content = self.cache.draw(renderer, bounds.size(), |frame| {
            frame.fill_rectangle(Point::ORIGIN, bounds.size(), palette::BACKGROUND);
            draw_grid(frame, bounds.size(), self.camera.offset, self.camera.scale);

            frame.translate(self.camera.offset);
            frame.scale(self.camera.scale);

            for chain in &self.chains {
                let (Some(start), Some(end)) = (
                    self.port_position(&chain.from_task, crate::state::OUTPUT_PORT),
                    self.port_position(&chain.to_task, crate::state::INPUT_PORT),
                ) else {
                    continue;
                };
                draw_chain(frame, start, end, chain.active, chain.completed, chain.failed);
            }

            for connection in &self.connections {
                let (Some(start), Some(end)) = (
                    self.port_position(&connection.from_node, &connection.from_port),
                    self.port_position(&connection.to_node, &connection.to_port),
                ) else {
                    continue;
                };
                draw_link(frame, start, end, connection.color, connection.animated);
            }

            for particle in self.flow_particles.iter().chain(self.chain_particles.iter()) {
                let x =
                    particle.start.x + (particle.target.x - particle.start.x) * particle.progress;
                let y =
                    particle.start.y + (particle.target.y - particle.start.y) * particle.progress;
                let dot = Path::circle(Point::new(x, y), 2.5);
                frame.fill(
                    &dot,
                    Color::from_rgba(0.95, 0.85, 0.45, particle.alpha.clamp(0.0, 1.0)),
                );
            }

            for agent in self.agents.values() {
                draw_agent(frame, agent);
            }

            for task in &self.tasks {
                draw_task(frame, task);
            }

            for combiner in &self.combiners {
                draw_combiner(frame, combiner);
            }
        });

        // Preview lines follow the cursor, so they are never cached.
        let mut overlay = Frame::new(renderer, bounds.size());
        let preview = match &state.session {
            DragSession::DraggingConnection {
                from_node,
                from_port,
                pointer,
            } => self
                .port_position(from_node, from_port)
                .map(|start| (start, *pointer, palette::PENDING)),
            DragSession::AssigningTask { task_id, pointer } => self
                .port_position(task_id, crate::state::OUTPUT_PORT)
                .map(|start| (start, *pointer, palette::ASSIGN)),
            DragSession::AssigningToCombiner {
                combiner_id,
                pointer,
            } => self
                .port_position(combiner_id, crate::state::OUTPUT_PORT)
                .map(|start| (start, *pointer, palette::ASSIGN)),
            _ => None,
        };
        if let Some((start, pointer, color)) = preview {
            overlay.translate(self.camera.offset);
            overlay.scale(self.camera.scale);
            let end = self.camera.to_world(pointer);
            draw_pending(&mut overlay, start, end, color);
        }

        vec![content, overlay.into_geometry()]
    }

    fn mouse_interaction(
        &self,
        state: &Self::State,
        bounds: Rectangle,
        cursor: mouse::Cursor,
    ) -> mouse::Interaction {
        if !cursor.is_over(bounds) {
            return mouse::Interaction::default();
        }
        match &state.session {
            DragSession::PanningCanvas { .. }
            | DragSession::DraggingAgent { .. }
            | DragSession::DraggingTask { .. }
            | DragSession::DraggingCombiner { .. } => mouse::Interaction::Grabbing,
            DragSession::DraggingConnection { .. }
            | DragSession::AssigningTask { .. }
            | DragSession::AssigningToCombiner { .. } => mouse::Interaction::Crosshair,
            DragSession::Idle => {
                if state.space_held {
                    return mouse::Interaction::Grab;
                }
                match cursor.position_in(bounds) {
                    Some(position) => match self.hit_test(position) {
                        HitResult::Task(_) | HitResult::Agent(_) | HitResult::Combiner(_) => {
                            mouse::Interaction::Grab
                        }
                        HitResult::Port { .. } => mouse::Interaction::Crosshair,
                        HitResult::Connection(_) => mouse::Interaction::Pointer,
                        HitResult::None => mouse::Interaction::default(),
                    },
                    None => mouse::Interaction::default(),
                }
            }
        }
    }
}

fn cubic_bezier(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let t2 = t * t;
    let t3 = t2 * t;
    let mt = 1.0 - t;
    let mt2 = mt * mt;
    let mt3 = mt2 * mt;

    Point::new(
        mt3 * p0.x + 3.0 * mt2 * t * p1.x + 3.0 * mt * t2 * p2.x + t3 * p3.x,
        mt3 * p0.y + 3.0 * mt2 * t * p1.y + 3.0 * mt * t2 * p2.y + t3 * p3.y,
    )
}

mod palette {
    use iced::Color;

    pub const BACKGROUND: Color = Color::from_rgb(0.075, 0.075, 0.085);
    pub const GRID_DOT: Color = Color::from_rgba(1.0, 1.0, 1.0, 0.04);

    pub const CARD_BG: Color = Color::from_rgb(0.11, 0.11, 0.13);
    pub const CARD_BORDER: Color = Color::from_rgb(0.22, 0.22, 0.26);

    pub const TEXT_PRIMARY: Color = Color::from_rgb(0.92, 0.92, 0.94);
    pub const TEXT_SECONDARY: Color = Color::from_rgb(0.55, 0.55, 0.60);

    pub const AGENT_IDLE: Color = Color::from_rgb(0.45, 0.50, 0.58);
    pub const AGENT_ACTIVE: Color = Color::from_rgb(0.35, 0.75, 0.45);
    pub const AGENT_BUSY: Color = Color::from_rgb(0.92, 0.65, 0.25);

    pub const STATUS_PENDING: Color = Color::from_rgb(0.55, 0.55, 0.60);
    pub const STATUS_RUNNING: Color = Color::from_rgb(0.30, 0.65, 0.90);
    pub const STATUS_DONE: Color = Color::from_rgb(0.35, 0.75, 0.45);
    pub const STATUS_FAILED: Color = Color::from_rgb(0.85, 0.35, 0.35);

    pub const PENDING: Color = Color::from_rgb(0.50, 0.70, 0.80);
    pub const ASSIGN: Color = Color::from_rgb(0.92, 0.65, 0.25);

    pub const CONNECTION_COLORS: [Color; 5] = [
        Color::from_rgb(0.50, 0.70, 0.80),
        Color::from_rgb(0.92, 0.65, 0.25),
        Color::from_rgb(0.35, 0.75, 0.45),
        Color::from_rgb(0.80, 0.50, 0.85),
        Color::from_rgb(0.30, 0.75, 0.85),
    ];
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{cut}…")
    } else {
        text.to_string()
    }
}

fn draw_grid(frame: &mut Frame, size: Size, offset: Vector, scale: f32) {
    let grid_size = 40.0 * scale;
    let offset_x = offset.x % grid_size;
    let offset_y = offset.y % grid_size;

    let cols = (size.width / grid_size) as i32 + 2;
    let rows = (size.height / grid_size) as i32 + 2;

    for row in 0..rows {
        for col in 0..cols {
            let x = offset_x + col as f32 * grid_size;
            let y = offset_y + row as f32 * grid_size;
            let dot = Path::circle(Point::new(x, y), 1.0);
            frame.fill(&dot, palette::GRID_DOT);
        }
    }
}

fn draw_rounded_rect(frame: &mut Frame, pos: Point, size: Size, radius: f32, color: Color) {
    let path = rounded_rect_path(pos, size, radius);
    frame.fill(&path, color);
}

fn stroke_rounded_rect(
    frame: &mut Frame,
    pos: Point,
    size: Size,
    radius: f32,
    color: Color,
    width: f32,
) {
    let path = rounded_rect_path(pos, size, radius);
    frame.stroke(&path, Stroke::default().with_color(color).with_width(width));
}

fn rounded_rect_path(pos: Point, size: Size, radius: f32) -> Path {
    Path::new(|builder| {
        let r = radius.min(size.width / 2.0).min(size.height / 2.0);
        let x = pos.x;
        let y = pos.y;
        let w = size.width;
        let h = size.height;

        builder.move_to(Point::new(x + r, y));
        builder.line_to(Point::new(x + w - r, y));
        builder.arc_to(Point::new(x + w, y), Point::new(x + w, y + r), r);
        builder.line_to(Point::new(x + w, y + h - r));
        builder.arc_to(Point::new(x + w, y + h), Point::new(x + w - r, y + h), r);
        builder.line_to(Point::new(x + r, y + h));
        builder.arc_to(Point::new(x, y + h), Point::new(x, y + h - r), r);
        builder.line_to(Point::new(x, y + r));
        builder.arc_to(Point::new(x, y), Point::new(x + r, y), r);
        builder.close();
    })
}

fn agent_color(status: AgentStatus) -> Color {
    match status {
        AgentStatus::Idle => palette::AGENT_IDLE,
        AgentStatus::Active => palette::AGENT_ACTIVE,
        AgentStatus::Busy => palette::AGENT_BUSY,
    }
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Pending => palette::STATUS_PENDING,
        TaskStatus::InProgress => palette::STATUS_RUNNING,
        TaskStatus::Completed => palette::STATUS_DONE,
        TaskStatus::Failed => palette::STATUS_FAILED,
    }
}

fn draw_agent(frame: &mut Frame, agent: &Agent) {
    let color = agent_color(agent.status);

    // Pulse ring breathes with the phase counter the animator advances.
    let pulse = 0.5 + 0.5 * agent.pulse_phase.sin();
    let ring = Path::circle(agent.position, agent.radius + 4.0 + pulse * 3.0);
    frame.fill(
        &ring,
        Color::from_rgba(color.r, color.g, color.b, 0.10 + 0.10 * pulse),
    );

    let body = Path::circle(agent.position, agent.radius);
    frame.fill(&body, palette::CARD_BG);
    frame.stroke(&body, Stroke::default().with_color(color).with_width(2.0));

    let name = Text {
        content: truncate(&agent.name, 14),
        position: Point::new(
            agent.position.x - agent.radius + 6.0,
            agent.position.y - 8.0,
        ),
        color: palette::TEXT_PRIMARY,
        size: iced::Pixels(12.0),
        ..Text::default()
    };
    frame.fill_text(name);

    let counts = Text {
        content: format!(
            "{} run  {} queued  {} done",
            agent.stats.current, agent.stats.queued, agent.stats.completed
        ),
        position: Point::new(
            agent.position.x - agent.radius + 6.0,
            agent.position.y + 6.0,
        ),
        color: palette::TEXT_SECONDARY,
        size: iced::Pixels(9.0),
        ..Text::default()
    };
    frame.fill_text(counts);
}

fn draw_task(frame: &mut Frame, task: &Task) {
    let Some(rect) = task_rect(task) else {
        return;
    };
    let position = Point::new(rect.x, rect.y);
    let size = Size::new(rect.width, rect.height);
    let color = status_color(task.status);

    draw_rounded_rect(frame, position, size, 8.0, palette::CARD_BG);
    stroke_rounded_rect(frame, position, size, 8.0, palette::CARD_BORDER, 1.0);

    // Status stripe on the left edge.
    frame.fill_rectangle(
        Point::new(position.x, position.y + 4.0),
        Size::new(3.0, size.height - 8.0),
        color,
    );

    let title = Text {
        content: truncate(&task.description, 22),
        position: Point::new(position.x + 10.0, position.y + 8.0),
        color: palette::TEXT_PRIMARY,
        size: iced::Pixels(11.0),
        ..Text::default()
    };
    frame.fill_text(title);

    let route = Text {
        content: format!("{} → {}", truncate(&task.from, 8), truncate(&task.to, 8)),
        position: Point::new(position.x + 10.0, position.y + 24.0),
        color: palette::TEXT_SECONDARY,
        size: iced::Pixels(9.0),
        ..Text::default()
    };
    frame.fill_text(route);

    if task.status == TaskStatus::InProgress {
        let bar_width = size.width - 20.0;
        frame.fill_rectangle(
            Point::new(position.x + 10.0, position.y + size.height - 14.0),
            Size::new(bar_width, 4.0),
            palette::CARD_BORDER,
        );
        frame.fill_rectangle(
            Point::new(position.x + 10.0, position.y + size.height - 14.0),
            Size::new(bar_width * (task.shown_progress / 100.0).clamp(0.0, 1.0), 4.0),
            color,
        );
    }
}

fn draw_combiner(frame: &mut Frame, combiner: &CombinerNode) {
    let info = combiner.kind.info();

    draw_rounded_rect(frame, combiner.position, combiner.size, 8.0, palette::CARD_BG);
    stroke_rounded_rect(
        frame,
        combiner.position,
        combiner.size,
        8.0,
        info.color,
        1.5,
    );

    let label = Text {
        content: format!("{} {}", info.icon, info.label),
        position: Point::new(
            combiner.position.x + 10.0,
            combiner.position.y + combiner.size.height / 2.0 - 6.0,
        ),
        color: palette::TEXT_PRIMARY,
        size: iced::Pixels(12.0),
        ..Text::default()
    };
    frame.fill_text(label);

    let slots = combiner.input_ports.len().max(2);
    for index in 0..slots {
        let slot = combiner_input_slot(combiner, index, slots);
        let occupied = index < combiner.input_ports.len();
        let circle = Path::circle(slot, PORT_RADIUS);
        frame.fill(
            &circle,
            if occupied {
                info.color
            } else {
                palette::CARD_BORDER
            },
        );
    }

    let output = Point::new(
        combiner.position.x + combiner.size.width / 2.0,
        combiner.position.y + combiner.size.height,
    );
    let circle = Path::circle(output, PORT_RADIUS);
    frame.fill(&circle, info.color);
    let inner = Path::circle(output, PORT_RADIUS - 2.0);
    frame.fill(&inner, Color::from_rgba(1.0, 1.0, 1.0, 0.15));
}

fn draw_chain(
    frame: &mut Frame,
    start: Point,
    end: Point,
    active: bool,
    completed: bool,
    failed: bool,
) {
    let color = if failed {
        palette::STATUS_FAILED
    } else if completed {
        palette::STATUS_DONE
    } else if active {
        palette::STATUS_RUNNING
    } else {
        palette::TEXT_SECONDARY
    };
    let path = Path::line(start, end);
    frame.stroke(
        &path,
        Stroke::default()
            .with_color(Color::from_rgba(color.r, color.g, color.b, 0.45))
            .with_width(1.5),
    );
}

fn draw_link(frame: &mut Frame, start: Point, end: Point, color_index: usize, animated: bool) {
    let offset = ((end.y - start.y).abs() / 2.0).max(40.0);
    let path = Path::new(|builder| {
        builder.move_to(start);
        builder.bezier_curve_to(
            Point::new(start.x, start.y + offset),
            Point::new(end.x, end.y - offset),
            end,
        );
    });

    let color = palette::CONNECTION_COLORS[color_index % palette::CONNECTION_COLORS.len()];
    frame.stroke(
        &path,
        Stroke::default()
            .with_color(Color::from_rgba(color.r, color.g, color.b, 0.15))
            .with_width(7.0)
            .with_line_cap(canvas::LineCap::Round),
    );
    frame.stroke(
        &path,
        Stroke::default()
            .with_color(color)
            .with_width(if animated { 2.5 } else { 1.5 })
            .with_line_cap(canvas::LineCap::Round),
    );
}

fn draw_pending(frame: &mut Frame, start: Point, end: Point, color: Color) {
    let offset = ((end.y - start.y).abs() / 2.0).max(40.0);
    let path = Path::new(|builder| {
        builder.move_to(start);
        builder.bezier_curve_to(
            Point::new(start.x, start.y + offset),
            Point::new(end.x, end.y - offset),
            end,
        );
    });

    frame.stroke(
        &path,
        Stroke::default()
            .with_color(Color::from_rgba(1.0, 1.0, 1.0, 0.10))
            .with_width(9.0)
            .with_line_cap(canvas::LineCap::Round),
    );
    frame.stroke(
        &path,
        Stroke::default()
            .with_color(color)
            .with_width(3.0)
            .with_line_cap(canvas::LineCap::Round),
    );

    let dot = Path::circle(end, 6.0);
    frame.fill(&dot, Color::from_rgba(1.0, 1.0, 1.0, 0.3));
    let inner = Path::circle(end, 3.0);
    frame.fill(&inner, color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn approx(a: Point, b: Point) {
        assert!(
            (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn world_screen_round_trip() {
        let camera = Camera {
            offset: Vector::new(130.0, -40.0),
            scale: 1.6,
        };
        let world = Point::new(250.0, 90.0);
        approx(camera.to_world(camera.to_screen(world)), world);
    }

    #[test]
    fn zoom_stays_clamped_for_any_wheel_sequence() {
        let mut camera = Camera::default();
        let cursor = Point::new(400.0, 300.0);
        for i in 0..500 {
            let steps = if i % 7 < 4 { 1.0 } else { -1.0 };
            camera.zoom_at(steps, cursor);
            assert!((MIN_ZOOM..=MAX_ZOOM).contains(&camera.scale));
        }
        for _ in 0..100 {
            camera.zoom_at(-1.0, cursor);
        }
        assert_eq!(camera.scale, MIN_ZOOM);
        for _ in 0..100 {
            camera.zoom_at(1.0, cursor);
        }
        assert_eq!(camera.scale, MAX_ZOOM);
    }

    #[test]
    fn zoom_keeps_cursor_world_point_fixed() {
        let mut camera = Camera::default();
        let cursor = Point::new(200.0, 150.0);
        let before = camera.to_world(cursor);
        camera.zoom_at(1.0, cursor);
        approx(camera.to_world(cursor), before);
    }

    #[test]
    fn task_cards_hit_before_agents() {
        let mut state = WorkspaceState::new("ws");
        state
            .agents
            .insert("a".to_string(), Agent::new("a", Point::new(100.0, 100.0)));
        let mut task = Task::new("t1", "a", "b");
        task.position = Some(Point::new(80.0, 80.0));
        state.tasks.push(task);
        state.prepare_frame();

        // (100, 100) is inside both the agent circle and the task card.
        assert_eq!(
            state.hit_test(Point::new(100.0, 100.0)),
            HitResult::Task("t1".to_string())
        );
        // Left of the card, still inside the circle.
        assert_eq!(
            state.hit_test(Point::new(70.0, 100.0)),
            HitResult::Agent("a".to_string())
        );
    }

    #[test]
    fn port_suffix_is_authoritative_for_slot_placement() {
        let mut state = WorkspaceState::new("ws");
        let id = state.add_combiner(CombinerKind::Merge, Point::new(0.0, 0.0));

        // Requesting input-3 on an empty combiner renders four slots.
        let p3 = state.port_position(&id, "input-3").unwrap();
        let combiner = state.combiner(&id).unwrap();
        let expected = combiner_input_slot(combiner, 3, 4);
        assert_eq!(p3, expected);
        assert_eq!(p3.y, combiner.position.y);
    }

    #[test]
    fn output_port_sits_at_bottom_center() {
        let mut state = WorkspaceState::new("ws");
        let id = state.add_combiner(CombinerKind::Vote, Point::new(10.0, 20.0));
        let output = state.port_position(&id, "output").unwrap();
        assert_eq!(
            output,
            Point::new(10.0 + COMBINER_WIDTH / 2.0, 20.0 + COMBINER_HEIGHT)
        );
    }

    #[test]
    fn unresolvable_ports_return_none() {
        let state = WorkspaceState::new("ws");
        assert_eq!(state.port_position("ghost", "output"), None);

        let mut state = WorkspaceState::new("ws");
        state
            .agents
            .insert("a".to_string(), Agent::new("a", Point::new(0.0, 0.0)));
        assert_eq!(state.port_position("a", "input-0"), None);
    }

    #[test]
    fn prepare_frame_places_tasks_once() {
        let mut state = WorkspaceState::new("ws");
        state
            .agents
            .insert("a".to_string(), Agent::new("a", Point::new(0.0, 0.0)));
        state
            .agents
            .insert("b".to_string(), Agent::new("b", Point::new(400.0, 0.0)));
        state.tasks.push(Task::new("t1", "a", "b"));

        assert_eq!(state.task("t1").unwrap().position, None);
        state.prepare_frame();
        let placed = state.task("t1").unwrap().position.unwrap();
        assert!(state.task("t1").unwrap().bounds.is_some());

        // A second prepare does not move the card.
        state.prepare_frame();
        assert_eq!(state.task("t1").unwrap().position, Some(placed));
    }

    #[test]
    fn connection_target_respects_polarity() {
        let mut state = WorkspaceState::new("ws");
        let id = state.add_combiner(CombinerKind::Merge, Point::new(100.0, 100.0));
        let slot = {
            let combiner = state.combiner(&id).unwrap();
            combiner_input_slot(combiner, 0, 2)
        };

        // Dragging from an output wants an input: the slot qualifies.
        assert_eq!(
            state.connection_target(slot, true),
            Some((id.clone(), "input-0".to_string()))
        );
        // Dragging from an input refuses another input.
        assert_eq!(state.connection_target(slot, false), None);
    }
}
