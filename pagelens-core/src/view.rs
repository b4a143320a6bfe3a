use serde::{Deserialize, Serialize};

use crate::error::ViewerError;

pub const MIN_ZOOM: f64 = 0.001;
pub const MAX_ZOOM: f64 = 5.000;
pub const ZOOM_STEP: f64 = 0.1;

/// Quarter-turn page rotation, stored normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn rotated(self, direction: RotateDirection) -> Self {
        use Rotation::*;
        match (self, direction) {
            (Deg0, RotateDirection::Clockwise) => Deg90,
            (Deg90, RotateDirection::Clockwise) => Deg180,
            (Deg180, RotateDirection::Clockwise) => Deg270,
            (Deg270, RotateDirection::Clockwise) => Deg0,
            (Deg0, RotateDirection::CounterClockwise) => Deg270,
            (Deg90, RotateDirection::CounterClockwise) => Deg0,
            (Deg180, RotateDirection::CounterClockwise) => Deg90,
            (Deg270, RotateDirection::CounterClockwise) => Deg180,
        }
    }

    /// True when the page's width and height trade places.
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        if degrees % 90 != 0 {
            return Err(format!("rotation must be a multiple of 90, got {degrees}"));
        }
        Rotation::from_degrees(i64::from(degrees))
            .ok_or_else(|| format!("rotation must be a multiple of 90, got {degrees}"))
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

impl RotateDirection {
    pub fn delta_degrees(self) -> i64 {
        match self {
            RotateDirection::Clockwise => 90,
            RotateDirection::CounterClockwise => -90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Surface {
    #[default]
    Normal,
    Fullscreen,
}

impl Surface {
    pub const ALL: [Surface; 2] = [Surface::Normal, Surface::Fullscreen];
}

/// Presentation parameters. Zoom and rotation never leave their legal domains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    zoom: f64,
    rotation: Rotation,
    inverted: bool,
    active_surface: Surface,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            rotation: Rotation::Deg0,
            inverted: false,
            active_surface: Surface::Normal,
        }
    }
}

impl ViewState {
    pub fn new(zoom: f64, rotation: Rotation, inverted: bool) -> Result<Self, ViewerError> {
        let mut state = Self {
            rotation,
            inverted,
            ..Self::default()
        };
        state.set_zoom(zoom)?;
        Ok(state)
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn inverted(&self) -> bool {
        self.inverted
    }

    pub fn active_surface(&self) -> Surface {
        self.active_surface
    }

    pub fn is_fullscreen(&self) -> bool {
        self.active_surface == Surface::Fullscreen
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom + ZOOM_STEP).min(MAX_ZOOM);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom - ZOOM_STEP).max(MIN_ZOOM);
    }

    pub fn set_zoom(&mut self, value: f64) -> Result<(), ViewerError> {
        if !value.is_finite() || !(MIN_ZOOM..=MAX_ZOOM).contains(&value) {
            return Err(ViewerError::out_of_range(value));
        }
        self.zoom = value;
        Ok(())
    }

    pub fn rotate(&mut self, direction: RotateDirection) {
        self.rotation = self.rotation.rotated(direction);
    }

    pub fn toggle_invert(&mut self) {
        self.inverted = !self.inverted;
    }

    pub fn toggle_fullscreen(&mut self) {
        self.active_surface = match self.active_surface {
            Surface::Normal => Surface::Fullscreen,
            Surface::Fullscreen => Surface::Normal,
        };
    }

    pub fn exit_fullscreen(&mut self) {
        self.active_surface = Surface::Normal;
    }

    /// True when `other` would need a different raster than `self`.
    pub fn transform_differs(&self, other: &ViewState) -> bool {
        self.zoom != other.zoom || self.rotation != other.rotation || self.inverted != other.inverted
    }
}
