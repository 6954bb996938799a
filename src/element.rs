//! Element model — the closed set of drawable objects on a board.
//!
//! DESIGN
//! ======
//! Elements are an internally tagged enum with exactly five variants, each
//! carrying only the fields that matter for it. Geometry is a bounding box
//! for shapes; lines and arrows additionally carry an authoritative endpoint
//! (`endX`/`endY`) because the bounding box alone cannot distinguish the
//! four diagonal directions.
//!
//! Updates arrive as a partial-fields patch and are merged shallowly,
//! field by field. The variant is fixed at creation and no patch can
//! change it.

use serde::{Deserialize, Serialize};

/// Minimum width/height for a drag-created shape. Anything smaller is
/// treated as an accidental click and discarded.
pub const MIN_SHAPE_EXTENT: f64 = 10.0;

/// Minimum endpoint distance for a line or arrow.
pub const MIN_CONNECTOR_LENGTH: f64 = 10.0;

// =============================================================================
// VARIANT BODIES
// =============================================================================

/// Fields shared by rectangles and circles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Stroke color, hex string.
    pub color: String,
    pub fill_color: String,
    pub border_width: f64,
    pub z_index: i32,
}

/// Lines and arrows. `end_x`/`end_y` are the authoritative endpoint;
/// `width`/`height` are derived bounding-box extents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub id: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub end_x: f64,
    pub end_y: f64,
    pub color: String,
    pub border_width: f64,
    pub z_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub id: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: String,
    pub font_size: f64,
    pub content: String,
    pub z_index: i32,
}

// =============================================================================
// ELEMENT
// =============================================================================

/// One drawable object. The `type` tag on the wire selects the variant;
/// unknown tags fail deserialization and the event carrying them is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Rectangle(Shape),
    Circle(Shape),
    Line(Connector),
    Arrow(Connector),
    Text(TextBlock),
}

/// Creation-time validation failure. Invalid drafts are dropped at the
/// session boundary, never stored.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidElement {
    #[error("negative width or height")]
    NegativeExtent,
    #[error("smaller than the minimum drag threshold")]
    Degenerate,
}

impl Element {
    /// Board-unique identifier, proposed by the creating client.
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Element::Rectangle(s) | Element::Circle(s) => s.id,
            Element::Line(c) | Element::Arrow(c) => c.id,
            Element::Text(t) => t.id,
        }
    }

    /// Validate a freshly drawn element.
    ///
    /// # Errors
    ///
    /// `NegativeExtent` for any negative width/height, `Degenerate` when the
    /// drag that produced the element was below the minimum threshold.
    pub fn validate(&self) -> Result<(), InvalidElement> {
        match self {
            Element::Rectangle(s) | Element::Circle(s) => validate_extent(s.width, s.height),
            Element::Text(t) => validate_extent(t.width, t.height),
            Element::Line(c) | Element::Arrow(c) => {
                if c.width < 0.0 || c.height < 0.0 {
                    return Err(InvalidElement::NegativeExtent);
                }
                let length = (c.end_x - c.x).hypot(c.end_y - c.y);
                if length < MIN_CONNECTOR_LENGTH {
                    return Err(InvalidElement::Degenerate);
                }
                Ok(())
            }
        }
    }

    /// Shallow-merge a partial-fields patch into this element. Fields the
    /// variant does not carry are ignored; the variant itself never changes.
    pub fn apply(&mut self, updates: &ElementUpdate) {
        match self {
            Element::Rectangle(shape) | Element::Circle(shape) => {
                apply_position(&mut shape.x, &mut shape.y, updates);
                apply_extent(&mut shape.width, &mut shape.height, updates);
                if let Some(color) = &updates.color {
                    shape.color.clone_from(color);
                }
                if let Some(fill) = &updates.fill_color {
                    shape.fill_color.clone_from(fill);
                }
                if let Some(border) = updates.border_width {
                    shape.border_width = border;
                }
                if let Some(z) = updates.z_index {
                    shape.z_index = z;
                }
            }
            Element::Line(connector) | Element::Arrow(connector) => {
                apply_position(&mut connector.x, &mut connector.y, updates);
                apply_extent(&mut connector.width, &mut connector.height, updates);
                if let Some(end_x) = updates.end_x {
                    connector.end_x = end_x;
                }
                if let Some(end_y) = updates.end_y {
                    connector.end_y = end_y;
                }
                if let Some(color) = &updates.color {
                    connector.color.clone_from(color);
                }
                if let Some(border) = updates.border_width {
                    connector.border_width = border;
                }
                if let Some(z) = updates.z_index {
                    connector.z_index = z;
                }
            }
            Element::Text(text) => {
                apply_position(&mut text.x, &mut text.y, updates);
                apply_extent(&mut text.width, &mut text.height, updates);
                if let Some(color) = &updates.color {
                    text.color.clone_from(color);
                }
                if let Some(size) = updates.font_size {
                    text.font_size = size;
                }
                if let Some(content) = &updates.content {
                    text.content.clone_from(content);
                }
                if let Some(z) = updates.z_index {
                    text.z_index = z;
                }
            }
        }
    }
}

fn validate_extent(width: f64, height: f64) -> Result<(), InvalidElement> {
    if width < 0.0 || height < 0.0 {
        return Err(InvalidElement::NegativeExtent);
    }
    if width < MIN_SHAPE_EXTENT || height < MIN_SHAPE_EXTENT {
        return Err(InvalidElement::Degenerate);
    }
    Ok(())
}

fn apply_position(x: &mut f64, y: &mut f64, updates: &ElementUpdate) {
    if let Some(new_x) = updates.x {
        *x = new_x;
    }
    if let Some(new_y) = updates.y {
        *y = new_y;
    }
}

// Extents clamp at zero so a patch can never violate the non-negative
// geometry invariant.
fn apply_extent(width: &mut f64, height: &mut f64, updates: &ElementUpdate) {
    if let Some(new_width) = updates.width {
        *width = new_width.max(0.0);
    }
    if let Some(new_height) = updates.height {
        *height = new_height.max(0.0);
    }
}

// =============================================================================
// PARTIAL UPDATE
// =============================================================================

/// Partial-fields patch for `element-update`. Absent fields are left
/// untouched, which is what makes concurrent updates to disjoint fields
/// both survive. There is deliberately no `type` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
}
