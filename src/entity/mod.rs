//! The companion entity: identity, mode, position and facing.

pub mod avatar;
pub mod mode;
pub mod registry;

use mode::ModeRegister;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use avatar::{Avatar, AvatarCommand, RecordingAvatar, Routine};
pub use mode::{EntityMode, ModeTransition, Motion};
pub use registry::EntityRegistry;

/// Default footprint of the companion in scene units.
pub const ENTITY_SIZE: Size = Size {
    width: 50.0,
    height: 50.0,
};

/// Stable identifier used by deferred callbacks instead of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub(crate) u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Horizontal orientation of the sprite.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Left,
    #[default]
    Right,
}

/// Direction of a single move input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    Left,
    Right,
    Up,
    Down,
}

impl MovementDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }

    /// Facing implied by the direction; vertical moves keep the current one.
    fn facing(self) -> Option<Facing> {
        match self {
            Self::Left => Some(Facing::Left),
            Self::Right => Some(Facing::Right),
            Self::Up | Self::Down => None,
        }
    }
}

/// The companion as the controller sees it.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    mode: ModeRegister,
    position: Point,
    facing: Facing,
    size: Size,
}

impl Entity {
    pub fn new(id: EntityId, position: Point) -> Self {
        Self {
            id,
            mode: ModeRegister::new(),
            position,
            facing: Facing::default(),
            size: ENTITY_SIZE,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn mode(&self) -> EntityMode {
        self.mode.current()
    }

    /// See [`ModeRegister::set_mode`].
    pub fn set_mode(&mut self, next: EntityMode, avatar: &mut dyn Avatar) -> Option<ModeTransition> {
        self.mode.set_mode(next, avatar)
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn set_position(&mut self, position: Point) {
        self.position = position;
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Whether `point` falls inside the entity's bounds (centred on its position).
    pub fn contains(&self, point: Point) -> bool {
        let half_w = self.size.width / 2.0;
        let half_h = self.size.height / 2.0;
        (point.x - self.position.x).abs() <= half_w && (point.y - self.position.y).abs() <= half_h
    }

    /// Move by `distance` in `direction`. Returns the new facing when it changed.
    pub fn step(&mut self, direction: MovementDirection, distance: f64) -> Option<Facing> {
        match direction {
            MovementDirection::Left => self.position.x -= distance,
            MovementDirection::Right => self.position.x += distance,
            MovementDirection::Up => self.position.y += distance,
            MovementDirection::Down => self.position.y -= distance,
        }
        self.face(direction.facing()?)
    }

    /// Turn to `facing`. Returns it when this changed the orientation.
    pub fn face(&mut self, facing: Facing) -> Option<Facing> {
        if self.facing == facing {
            return None;
        }
        self.facing = facing;
        Some(facing)
    }
}
