mod animation;
mod api;
mod config;
mod connections;
mod graph;
mod layout;
mod reconcile;
mod state;
mod stream;

use iced::widget::{button, canvas, column, container, row, scrollable, text};
use iced::{Element, Length, Subscription, Task, Theme};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use animation::Animator;
use api::{ApiClient, ApiError, NewCombinerTask, NewTask};
use config::Config;
use graph::CanvasMessage;
use layout::LayoutDoc;
use reconcile::{ServerEvent, TaskPayload, WorkspaceSnapshot};
use state::{PendingAssignment, Selection, WorkspaceState};
use stream::StreamEvent;

const PANEL_WIDTH: f32 = 280.0;

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    iced::application(init, update, view)
        .title("Tether")
        .subscription(subscription)
        .theme(theme)
        .antialiasing(true)
        .run()
}

fn theme(_app: &Tether) -> Theme {
    Theme::Dark
}

enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

struct Tether {
    api: ApiClient,
    state: WorkspaceState,
    animator: Animator,
    load: LoadState,
}

#[derive(Debug, Clone)]
pub enum Message {
    Canvas(CanvasMessage),
    Stream(StreamEvent),
    Tick,
    SnapshotLoaded(Result<(WorkspaceSnapshot, Option<LayoutDoc>), ApiError>),
    TaskCreated {
        local_id: String,
        result: Result<TaskPayload, ApiError>,
    },
    TaskAssigned(Result<TaskPayload, ApiError>),
    CombinerTaskCreated {
        combiner_id: String,
        result: Result<TaskPayload, ApiError>,
    },
    TaskDeleted {
        id: String,
        result: Result<(), ApiError>,
    },
    LayoutSaved(Result<(), ApiError>),
    StartAssignTask(String),
    StartAssignCombiner(String),
    DeleteTaskRequested(String),
    ClosePanels,
}

fn init() -> (Tether, Task<Message>) {
    let config = Config::load().unwrap_or_default();
    let _ = config.save();
    let api = ApiClient::new(&config.server_url, &config.workspace);
    let state = WorkspaceState::new(&config.workspace);

    let loader = api.clone();
    let load = Task::perform(
        async move { load_workspace(loader).await },
        Message::SnapshotLoaded,
    );

    (
        Tether {
            api,
            state,
            animator: Animator::new(),
            load: LoadState::Loading,
        },
        load,
    )
}

async fn load_workspace(
    api: ApiClient,
) -> Result<(WorkspaceSnapshot, Option<LayoutDoc>), ApiError> {
    let snapshot = api.fetch_snapshot().await?;
    // A missing or broken layout is not fatal; the canvas lays nodes out fresh.
    let layout = match api.load_layout().await {
        Ok(doc) => doc,
        Err(error) => {
            warn!("layout load failed: {error}");
            None
        }
    };
    Ok((snapshot, layout))
}

fn update(app: &mut Tether, message: Message) -> Task<Message> {
    match message {
        Message::Canvas(message) => handle_canvas(app, message),
        Message::Stream(event) => {
            match event {
                StreamEvent::Connected => {
                    app.state.push_timeline("event stream connected");
                    app.animator.start();
                }
                StreamEvent::Event(event) => {
                    app.state.apply_server_event(event);
                    app.state.cache.clear();
                }
                StreamEvent::Closed => {
                    app.state
                        .push_timeline("connection lost, retrying in 5 s");
                }
            }
            Task::none()
        }
        Message::Tick => {
            if app.animator.is_running() {
                app.state.prepare_frame();
                animation::tick(&mut app.state);
            }
            Task::none()
        }
        Message::SnapshotLoaded(Ok((snapshot, layout))) => {
            app.state
                .apply_server_event(ServerEvent::Snapshot { workspace: snapshot });
            if let Some(doc) = layout {
                layout::apply_layout(&mut app.state, &doc);
            }
            app.state.prepare_frame();
            app.load = LoadState::Ready;
            app.animator.start();
            Task::none()
        }
        Message::SnapshotLoaded(Err(error)) => {
            app.load = LoadState::Failed(error.to_string());
            app.animator.stop();
            Task::none()
        }
        Message::TaskCreated { local_id, result } => {
            match result {
                Ok(payload) => {
                    if app.state.task(&payload.id).is_some() {
                        // The stream already delivered this task; the
                        // placeholder is redundant.
                        app.state.remove_task(&local_id);
                    } else if let Some(task) = app.state.task_mut(&local_id) {
                        task.id = payload.id.clone();
                        if app.state.selection == Selection::Task(local_id.clone()) {
                            app.state.selection = Selection::Task(payload.id.clone());
                        }
                        app.state
                            .apply_server_event(ServerEvent::TaskCreated { task: payload });
                    }
                    // Otherwise the placeholder was deleted while the request
                    // was in flight; the late response is discarded.
                }
                Err(error) => {
                    app.state.remove_task(&local_id);
                    app.state
                        .push_notification(format!("task create failed: {error}"));
                    warn!("task create failed: {error}");
                }
            }
            app.state.cache.clear();
            Task::none()
        }
        Message::TaskAssigned(result) => {
            match result {
                Ok(payload) => {
                    app.state
                        .apply_server_event(ServerEvent::TaskCreated { task: payload });
                }
                Err(error) => {
                    app.state
                        .push_notification(format!("assignment failed: {error}"));
                    warn!("assignment failed: {error}");
                }
            }
            app.state.cache.clear();
            Task::none()
        }
        Message::CombinerTaskCreated {
            combiner_id,
            result,
        } => {
            match result {
                Ok(payload) => {
                    // Re-check: the combiner may be gone by now.
                    if let Some(combiner) = app.state.combiner_mut(&combiner_id) {
                        combiner.task_id = Some(payload.id.clone());
                    }
                    app.state
                        .apply_server_event(ServerEvent::TaskCreated { task: payload });
                }
                Err(error) => {
                    app.state
                        .push_notification(format!("combiner task failed: {error}"));
                    warn!("combiner task failed: {error}");
                }
            }
            app.state.cache.clear();
            Task::none()
        }
        Message::TaskDeleted { id, result } => {
            match result {
                Ok(()) => {
                    app.state.remove_task(&id);
                    app.state.push_timeline(format!("task {id} deleted"));
                    app.state.recompute_chains();
                }
                Err(error) => {
                    app.state
                        .push_notification(format!("task delete failed: {error}"));
                    warn!("task delete failed: {error}");
                }
            }
            app.state.cache.clear();
            Task::none()
        }
        Message::LayoutSaved(result) => {
            if let Err(error) = result {
                app.state
                    .push_notification(format!("layout save failed: {error}"));
                warn!("layout save failed: {error}");
            }
            Task::none()
        }
        Message::StartAssignTask(task_id) => {
            app.state.pending_assignment = Some(PendingAssignment::Task(task_id));
            Task::none()
        }
        Message::StartAssignCombiner(combiner_id) => {
            app.state.pending_assignment = Some(PendingAssignment::CombinerOutput(combiner_id));
            Task::none()
        }
        Message::DeleteTaskRequested(id) => {
            let api = app.api.clone();
            let task_id = id.clone();
            Task::perform(
                async move { api.delete_task(task_id).await },
                move |result| Message::TaskDeleted {
                    id: id.clone(),
                    result,
                },
            )
        }
        Message::ClosePanels => {
            close_panels(app);
            Task::none()
        }
    }
}

fn close_panels(app: &mut Tether) {
    app.state.selection = Selection::None;
    app.state.panels.task.close();
    app.state.panels.agent.close();
    app.state.panels.combiner.close();
}

fn save_layout(app: &Tether) -> Task<Message> {
    let api = app.api.clone();
    let doc = layout::collect_layout(&app.state);
    Task::perform(async move { api.save_layout(doc).await }, Message::LayoutSaved)
}

fn handle_canvas(app: &mut Tether, message: CanvasMessage) -> Task<Message> {
    match message {
        CanvasMessage::AgentDragged { name, position } => {
            if let Some(agent) = app.state.agents.get_mut(&name) {
                agent.position = position;
                agent.has_saved_position = true;
                app.state.cache.clear();
            }
            Task::none()
        }
        CanvasMessage::TaskDragged { id, position } => {
            if let Some(task) = app.state.task_mut(&id) {
                task.position = Some(position);
                app.state.cache.clear();
            }
            Task::none()
        }
        CanvasMessage::CombinerDragged { id, position } => {
            if let Some(combiner) = app.state.combiner_mut(&id) {
                combiner.position = position;
                app.state.cache.clear();
            }
            Task::none()
        }
        CanvasMessage::DragEnded => save_layout(app),
        CanvasMessage::Panned { offset } => {
            app.state.camera.offset = offset;
            app.state.cache.clear();
            Task::none()
        }
        CanvasMessage::Zoomed { steps, cursor } => {
            app.state.camera.zoom_at(steps, cursor);
            app.state.cache.clear();
            Task::none()
        }
        CanvasMessage::ConnectionMade {
            from_node,
            from_port,
            to_node,
            to_port,
        } => {
            // Orient output → input before bookkeeping.
            let (from_node, from_port, to_node, to_port) = if graph::port_is_input(&from_port) {
                (to_node, to_port, from_node, from_port)
            } else {
                (from_node, from_port, to_node, to_port)
            };

            // A port that cannot be resolved yet means the nodes raced the
            // drag; skip quietly.
            if app.state.port_position(&from_node, &from_port).is_none()
                || app.state.port_position(&to_node, &to_port).is_none()
            {
                return Task::none();
            }

            // Wiring a combiner's output into an agent also creates the
            // backend task that will execute the combination.
            if app.state.combiner(&from_node).is_some() && app.state.agents.contains_key(&to_node)
            {
                return wire_combiner_output(app, from_node, to_node);
            }

            app.state
                .create_connection(&from_node, &from_port, &to_node, &to_port);
            app.state.cache.clear();
            save_layout(app)
        }
        CanvasMessage::ConnectionCancelled => {
            app.state.cache.clear();
            Task::none()
        }
        CanvasMessage::ConnectionDeleted(id) => {
            app.state.delete_connection(&id);
            app.state.cache.clear();
            save_layout(app)
        }
        CanvasMessage::CombinerDeleted(id) => {
            app.state.delete_combiner(&id);
            if app.state.selection == Selection::Combiner(id) {
                close_panels(app);
            }
            app.state.cache.clear();
            save_layout(app)
        }
        CanvasMessage::CombinerRequested { kind, position } => {
            let id = app.state.add_combiner(kind, position);
            app.state.selection = Selection::Combiner(id);
            app.state.panels.combiner.open_to(PANEL_WIDTH);
            app.state.cache.clear();
            save_layout(app)
        }
        CanvasMessage::NewTaskFrom(agent) => {
            let description = "New task".to_string();
            let local_id =
                app.state
                    .insert_task_local(&agent, "unassigned", &description);
            app.state.selection = Selection::Task(local_id.clone());
            app.state.panels.task.open_to(PANEL_WIDTH);
            app.state.cache.clear();

            let api = app.api.clone();
            let request = NewTask {
                from: agent,
                to: "unassigned".to_string(),
                description,
            };
            Task::perform(
                async move { api.create_task(request).await },
                move |result| Message::TaskCreated {
                    local_id: local_id.clone(),
                    result,
                },
            )
        }
        CanvasMessage::AgentClicked(name) => {
            app.state.push_timeline(format!("agent {name} selected"));
            app.state.selection = Selection::Agent(name);
            app.state.panels.agent.open_to(PANEL_WIDTH);
            app.state.panels.task.close();
            app.state.panels.combiner.close();
            Task::none()
        }
        CanvasMessage::TaskClicked(id) => {
            app.state.selection = Selection::Task(id);
            app.state.panels.task.open_to(PANEL_WIDTH);
            app.state.panels.agent.close();
            app.state.panels.combiner.close();
            Task::none()
        }
        CanvasMessage::CombinerClicked(id) => {
            app.state.selection = Selection::Combiner(id);
            app.state.panels.combiner.open_to(PANEL_WIDTH);
            app.state.panels.agent.close();
            app.state.panels.task.close();
            Task::none()
        }
        CanvasMessage::AssignTask { task_id, agent } => {
            app.state.pending_assignment = None;
            // The task may have been deleted while the drag was in progress.
            if app.state.task(&task_id).is_none() || !app.state.agents.contains_key(&agent) {
                return Task::none();
            }
            if let Some(task) = app.state.task_mut(&task_id) {
                task.to = agent.clone();
            }
            app.state.cache.clear();

            let api = app.api.clone();
            Task::perform(
                async move { api.assign_task(task_id, agent).await },
                Message::TaskAssigned,
            )
        }
        CanvasMessage::AssignCombiner { combiner_id, agent } => {
            app.state.pending_assignment = None;
            wire_combiner_output(app, combiner_id, agent)
        }
        CanvasMessage::AssignmentCancelled => {
            app.state.pending_assignment = None;
            app.state.cache.clear();
            Task::none()
        }
        CanvasMessage::TimelineToggled => {
            if app.state.panels.timeline.target > 0.0 {
                app.state.panels.timeline.close();
            } else {
                app.state.panels.timeline.open_to(PANEL_WIDTH);
            }
            Task::none()
        }
        CanvasMessage::EscapePressed => {
            close_panels(app);
            Task::none()
        }
    }
}

fn wire_combiner_output(app: &mut Tether, combiner_id: String, agent: String) -> Task<Message> {
    let Some(combiner) = app.state.combiner(&combiner_id) else {
        return Task::none();
    };
    if !app.state.agents.contains_key(&agent) {
        return Task::none();
    }
    let kind = combiner.kind;
    let instruction = kind.info().default_instruction.to_string();
    let input_task_ids: Vec<String> = app
        .state
        .connections
        .iter()
        .filter(|c| c.to_node == combiner_id && connections::input_index(&c.to_port).is_some())
        .filter(|c| app.state.task(&c.from_node).is_some())
        .map(|c| c.from_node.clone())
        .collect();

    app.state.create_connection(
        &combiner_id,
        state::OUTPUT_PORT,
        &agent,
        state::INPUT_PORT,
    );
    app.state.cache.clear();

    let api = app.api.clone();
    let request = NewCombinerTask {
        combiner_id: combiner_id.clone(),
        kind,
        instruction,
        agent,
        input_task_ids,
    };
    let create = Task::perform(
        async move { api.create_combiner_task(request).await },
        move |result| Message::CombinerTaskCreated {
            combiner_id: combiner_id.clone(),
            result,
        },
    );
    Task::batch([create, save_layout(app)])
}

fn subscription(app: &Tether) -> Subscription<Message> {
    let mut subscriptions = vec![stream::subscribe().map(Message::Stream)];
    if app.animator.is_running() {
        subscriptions.push(iced::window::frames().map(|_| Message::Tick));
    }
    Subscription::batch(subscriptions)
}

fn view(app: &Tether) -> Element<'_, Message> {
    match &app.load {
        LoadState::Loading => container(text("connecting to workspace…").size(16))
            .center_x(Length::Fill)
            .center_y(Length::Fill)
            .into(),
        LoadState::Failed(error) => container(
            column![
                text("could not load the workspace").size(18),
                text(error.clone()).size(13),
            ]
            .spacing(8),
        )
        .center_x(Length::Fill)
        .center_y(Length::Fill)
        .into(),
        LoadState::Ready => {
            let surface = canvas(&app.state)
                .width(Length::Fill)
                .height(Length::Fill);

            let mut body = row![container(surface).width(Length::Fill).height(Length::Fill)];
            if let Some(panel) = selection_panel(app) {
                body = body.push(panel);
            }
            if app.state.panels.timeline.width > 0.5 {
                body = body.push(timeline_panel(app));
            }

            column![header(app), body.height(Length::Fill)].into()
        }
    }
}

fn header(app: &Tether) -> Element<'_, Message> {
    let metrics = app.state.metrics();
    let mut bar = row![
        text(format!("workspace: {}", app.state.workspace_id)).size(13),
        text(format!(
            "{} pending · {} running · {} done · {} failed",
            metrics.pending, metrics.in_progress, metrics.completed, metrics.failed
        ))
        .size(13),
        text(format!("{:.0}%", app.state.progress)).size(13),
    ]
    .spacing(24)
    .padding(8);

    if let Some(notification) = app.state.notifications.back() {
        bar = bar.push(text(notification.clone()).size(13));
    }
    bar.into()
}

fn selection_panel(app: &Tether) -> Option<Element<'_, Message>> {
    let panels = &app.state.panels;
    match &app.state.selection {
        Selection::Agent(name) if panels.agent.width > 0.5 => {
            let agent = app.state.agents.get(name)?;
            let mut body = column![
                text(agent.name.clone()).size(15),
                text(format!("status: {:?}", agent.status)).size(12),
                text(format!(
                    "running {} · queued {} · done {} · failed {}",
                    agent.stats.current, agent.stats.queued, agent.stats.completed,
                    agent.stats.failed
                ))
                .size(12),
                text("press n over an agent to queue a task from it").size(11),
            ]
            .spacing(8)
            .padding(12);
            if let Some(result) = &agent.last_result {
                body = body.push(text(format!("last result: {result}")).size(12));
            }
            Some(
                container(scrollable(body))
                    .width(Length::Fixed(panels.agent.width))
                    .height(Length::Fill)
                    .into(),
            )
        }
        Selection::Task(id) if panels.task.width > 0.5 => {
            let task = app.state.task(id)?;
            let mut body = column![
                text(task.description.clone()).size(15),
                text(format!("{} → {}", task.from, task.to)).size(12),
                text(format!("status: {:?}", task.status)).size(12),
                button(text("assign to agent…").size(12))
                    .on_press(Message::StartAssignTask(task.id.clone())),
                button(text("delete").size(12))
                    .on_press(Message::DeleteTaskRequested(task.id.clone())),
            ]
            .spacing(8)
            .padding(12);
            if let Some(error) = &task.error {
                body = body.push(text(format!("error: {error}")).size(12));
            }
            if let Some(result) = &task.result {
                body = body.push(text(format!("result: {result}")).size(12));
            }
            for line in task.log.iter().rev().take(10) {
                body = body.push(
                    text(format!("{} {}", line.at.format("%H:%M:%S"), line.text)).size(10),
                );
            }
            Some(
                container(scrollable(body))
                    .width(Length::Fixed(panels.task.width))
                    .height(Length::Fill)
                    .into(),
            )
        }
        Selection::Combiner(id) if panels.combiner.width > 0.5 => {
            let combiner = app.state.combiner(id)?;
            let info = combiner.kind.info();
            let mut body = column![
                text(format!("{} {}", info.icon, info.label)).size(15),
                text(info.default_instruction).size(12),
                text(format!("{} inputs wired", combiner.input_ports.len())).size(12),
                button(text("wire output to agent…").size(12))
                    .on_press(Message::StartAssignCombiner(combiner.id.clone())),
            ]
            .spacing(8)
            .padding(12);
            if let Some(task_id) = &combiner.task_id {
                body = body.push(text(format!("task: {task_id}")).size(11));
            }
            Some(
                container(scrollable(body))
                    .width(Length::Fixed(panels.combiner.width))
                    .height(Length::Fill)
                    .into(),
            )
        }
        _ => None,
    }
}

fn timeline_panel(app: &Tether) -> Element<'_, Message> {
    let mut body = column![text("timeline").size(14)].spacing(4).padding(12);
    for event in app.state.timeline.iter().rev().take(40) {
        body = body.push(
            text(format!("{} {}", event.at.format("%H:%M:%S"), event.text)).size(10),
        );
    }
    container(scrollable(body))
        .width(Length::Fixed(app.state.panels.timeline.width))
        .height(Length::Fill)
        .into()
}
