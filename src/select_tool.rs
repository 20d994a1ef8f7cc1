use bevy::prelude::*;

use crate::config::EditorConfig;
use crate::gizmos::GizmoState;
use crate::proxy::ProxyRegistry;
use crate::selectable::{ActiveViewCamera, ObjectKind, Selectable, object_kind, resolve_solid_ancestor};
use crate::selection::{Combine, Selection};
use crate::transform_drag::{TransformDragSet, TransformDragState};
use crate::viewport::{PickView, PointerState};

/// How far the pick ray reaches into the scene, in world units.
const PICK_RAY_RANGE: f32 = 10_000.0;
/// Clicks closer together than this re-use the sequential hit stack.
const SEQUENTIAL_RADIUS: f32 = 4.0;

pub struct SelectToolPlugin;

impl Plugin for SelectToolPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SelectTool>()
            .add_systems(Update, drive_select_tool.after(TransformDragSet));
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum SelectPhase {
    #[default]
    Idle,
    /// Pointer down, not yet decided between click and box drag.
    Pending { press: Vec2, combine: Combine, toggle: bool },
    BoxDrag { start: Vec2, combine: Combine },
}

/// The click / box-drag selection state machine.
#[derive(Resource, Default)]
pub struct SelectTool {
    phase: SelectPhase,
    current: Vec2,
    /// Live preview of what a box release would select.
    pub preview: Vec<Selectable>,
    seq: SequentialCycle,
}

impl SelectTool {
    /// The rubber-band rectangle while a box drag is in flight.
    pub fn active_rect(&self) -> Option<(Vec2, Vec2)> {
        match self.phase {
            SelectPhase::BoxDrag { start, .. } => {
                Some((start.min(self.current), start.max(self.current)))
            }
            _ => None,
        }
    }

    pub fn is_box_dragging(&self) -> bool {
        matches!(self.phase, SelectPhase::BoxDrag { .. })
    }
}

/// Click-cycling context: repeated clicks at the same spot walk down the
/// stack of hits under the cursor.
#[derive(Default)]
struct SequentialCycle {
    anchor: Option<Vec2>,
    hits: Vec<Selectable>,
    index: usize,
}

impl SequentialCycle {
    fn reset(&mut self) {
        self.anchor = None;
        self.hits.clear();
        self.index = 0;
    }
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

fn eligible(world: &World, item: &Selectable, config: &EditorConfig) -> bool {
    if !item.exists(world) || item.is_locked(world) {
        return false;
    }
    let host = item.host();
    if world.get::<ActiveViewCamera>(host).is_some() {
        return false;
    }
    let kind = match item {
        Selectable::Node(entity) => object_kind(world, *entity),
        _ => ObjectKind::Effect,
    };
    config.pick_filter.allows(kind)
}

/// Map a raw ray hit to the item a click on it should select.
fn redirect(world: &World, item: Selectable) -> Selectable {
    match item {
        Selectable::Node(entity) => Selectable::Node(resolve_solid_ancestor(world, entity)),
        other => other,
    }
}

fn eligible_hits(world: &World, registry: &ProxyRegistry, from: Vec3, to: Vec3) -> Vec<Selectable> {
    let config = world.resource::<EditorConfig>();
    let mut out: Vec<Selectable> = Vec::new();
    for hit in registry.ray_test(from, to) {
        let item = redirect(world, hit.target);
        if eligible(world, &item, config) && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Click resolution
// ---------------------------------------------------------------------------

/// Resolve a single click. `toggle` is the modifier-click path: it appends or
/// removes the topmost hit and never participates in sequential cycling.
pub fn resolve_click(world: &mut World, view: &PickView, cursor: Vec2, toggle: bool) {
    let Some((origin, dir)) = view.ray(cursor) else {
        return;
    };
    let hits = {
        let registry = world.resource::<ProxyRegistry>();
        eligible_hits(world, registry, origin, origin + dir * PICK_RAY_RANGE)
    };

    let sequential = world.resource::<EditorConfig>().sequential_select;

    let mut queue = bevy::ecs::world::CommandQueue::default();
    world.resource_scope(|world, mut tool: Mut<SelectTool>| {
        world.resource_scope(|world, mut selection: Mut<Selection>| {
            let mut commands = Commands::new(&mut queue, world);

            if toggle {
                tool.seq.reset();
                if let Some(&item) = hits.first() {
                    selection.toggle(&mut commands, item);
                }
                return;
            }

            let Some(&first) = hits.first() else {
                tool.seq.reset();
                selection.clear(&mut commands);
                return;
            };

            if sequential && hits.len() > 1 {
                let same_spot = tool
                    .seq
                    .anchor
                    .is_some_and(|anchor| anchor.distance(cursor) <= SEQUENTIAL_RADIUS);
                if same_spot && tool.seq.hits == hits {
                    // Same stack under the cursor: advance instead of
                    // re-resolving from the top.
                    tool.seq.index = (tool.seq.index + 1) % hits.len();
                } else {
                    tool.seq.hits = hits.clone();
                    tool.seq.index = 0;
                }
                tool.seq.anchor = Some(cursor);
                let item = tool.seq.hits[tool.seq.index];
                selection.select_single(&mut commands, item);
            } else {
                tool.seq.reset();
                selection.select_single(&mut commands, first);
            }
        });
    });
    queue.apply(world);
}

// ---------------------------------------------------------------------------
// Box resolution
// ---------------------------------------------------------------------------

/// Everything the current box would select, filtered and redirected.
pub fn box_contents(world: &World, view: &PickView, min: Vec2, max: Vec2) -> Vec<Selectable> {
    // Degenerate rects still clip as a sliver.
    let max = max.max(min + Vec2::splat(1.0));
    let Some(planes) = view.frustum_from_rect(min, max) else {
        return Vec::new();
    };
    let config = world.resource::<EditorConfig>();
    let registry = world.resource::<ProxyRegistry>();

    let mut out: Vec<Selectable> = Vec::new();
    for target in registry.clip_to_frustum(&planes) {
        let item = redirect(world, target);
        if eligible(world, &item, config) && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

pub fn resolve_box(world: &mut World, view: &PickView, start: Vec2, end: Vec2, combine: Combine) {
    let items = box_contents(world, view, start.min(end), start.max(end));

    let mut queue = bevy::ecs::world::CommandQueue::default();
    world.resource_scope(|world, mut selection: Mut<Selection>| {
        let mut commands = Commands::new(&mut queue, world);
        selection.apply_combine(&mut commands, combine, &items);
    });
    queue.apply(world);
}

// ---------------------------------------------------------------------------
// Frame driver
// ---------------------------------------------------------------------------

fn drive_select_tool(world: &mut World) {
    let mouse = world.resource::<ButtonInput<MouseButton>>();
    let left_just_pressed = mouse.just_pressed(MouseButton::Left);
    let left_released = mouse.just_released(MouseButton::Left);
    let keyboard = world.resource::<ButtonInput<KeyCode>>();
    let ctrl = keyboard.any_pressed([KeyCode::ControlLeft, KeyCode::ControlRight]);
    let shift = keyboard.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]);

    let pointer = world.resource::<PointerState>();
    let view = pointer.view;
    let cursor = pointer.viewport_cursor;

    // A transform gesture, or even a hot gizmo handle, owns the pointer.
    let gesture_active = world.resource::<TransformDragState>().active.is_some();
    let gizmo_hot = world.resource::<GizmoState>().hovered_axis.is_some()
        && world.resource::<GizmoState>().interactive();
    if gesture_active || (gizmo_hot && left_just_pressed) {
        world.resource_mut::<SelectTool>().phase = SelectPhase::Idle;
        return;
    }

    let (select_on_release, drag_threshold) = {
        let config = world.resource::<EditorConfig>();
        (config.select_on_release, config.drag_threshold)
    };

    let phase = world.resource::<SelectTool>().phase;
    match phase {
        SelectPhase::Idle => {
            let (Some(view), Some(cursor)) = (view, cursor) else {
                return;
            };
            if left_just_pressed {
                let combine = if shift {
                    Combine::Add
                } else if ctrl {
                    Combine::Remove
                } else {
                    Combine::Replace
                };
                {
                    let mut tool = world.resource_mut::<SelectTool>();
                    tool.phase = SelectPhase::Pending {
                        press: cursor,
                        combine,
                        toggle: ctrl,
                    };
                    tool.current = cursor;
                }
                if !select_on_release {
                    resolve_click(world, &view, cursor, ctrl);
                }
            }
        }
        SelectPhase::Pending { press, combine, toggle } => {
            let Some(cursor) = cursor else {
                world.resource_mut::<SelectTool>().phase = SelectPhase::Idle;
                return;
            };
            world.resource_mut::<SelectTool>().current = cursor;

            if left_released {
                world.resource_mut::<SelectTool>().phase = SelectPhase::Idle;
                if select_on_release {
                    if let Some(view) = view {
                        resolve_click(world, &view, cursor, toggle);
                    }
                }
            } else if cursor.distance(press) > drag_threshold {
                world.resource_mut::<SelectTool>().phase = SelectPhase::BoxDrag {
                    start: press,
                    combine,
                };
            }
        }
        SelectPhase::BoxDrag { start, combine } => {
            let Some(cursor) = cursor else {
                return;
            };
            world.resource_mut::<SelectTool>().current = cursor;

            if left_released {
                world.resource_mut::<SelectTool>().phase = SelectPhase::Idle;
                world.resource_mut::<SelectTool>().preview.clear();
                if let Some(view) = view {
                    resolve_box(world, &view, start, cursor, combine);
                }
            } else if let Some(view) = view {
                // Continuous evaluation drives the marquee highlight.
                let preview =
                    box_contents(world, &view, start.min(cursor), start.max(cursor));
                world.resource_mut::<SelectTool>().preview = preview;
            }
        }
    }
}
