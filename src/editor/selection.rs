use crate::foundation::core::PickedPoint;
use crate::layers::{Layer, LayerId, position};
use crate::mask::Mask;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Click to place the edit hotspot.
    #[default]
    Point,
    /// Click an object to have the model select it.
    Select,
    Brush,
    Erase,
}

impl Tool {
    pub fn uses_mask(self) -> bool {
        matches!(self, Self::Select | Self::Brush | Self::Erase)
    }
}

pub const DEFAULT_BRUSH_SIZE: f64 = 40.0;

/// Active layer plus the tool context that targets the next edit.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    active_layer: Option<LayerId>,
    tool: Tool,
    brush_size: f64,
    edit_hotspot: Option<PickedPoint>,
    adjust_hotspot: Option<PickedPoint>,
    mask: Option<Mask>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            active_layer: None,
            tool: Tool::Point,
            brush_size: DEFAULT_BRUSH_SIZE,
            edit_hotspot: None,
            adjust_hotspot: None,
            mask: None,
        }
    }
}

impl Selection {
    pub fn active_layer(&self) -> Option<LayerId> {
        self.active_layer
    }

    /// Focus a layer for editing: brush tool, no stale targets.
    pub fn select_layer(&mut self, id: LayerId) {
        self.active_layer = Some(id);
        self.edit_hotspot = None;
        self.mask = None;
        self.tool = Tool::Brush;
    }

    pub fn set_active_layer(&mut self, id: Option<LayerId>) {
        self.active_layer = id;
    }

    /// Drop the active layer if `layers` no longer contains it.
    pub fn retain_layers(&mut self, layers: &[Layer]) {
        if let Some(id) = self.active_layer
            && position(layers, id).is_none()
        {
            self.active_layer = None;
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn brush_size(&self) -> f64 {
        self.brush_size
    }

    pub fn set_brush_size(&mut self, size: f64) {
        self.brush_size = size.max(1.0);
    }

    pub fn edit_hotspot(&self) -> Option<PickedPoint> {
        self.edit_hotspot
    }

    pub fn set_edit_hotspot(&mut self, p: Option<PickedPoint>) {
        self.edit_hotspot = p;
    }

    pub fn adjust_hotspot(&self) -> Option<PickedPoint> {
        self.adjust_hotspot
    }

    pub fn set_adjust_hotspot(&mut self, p: Option<PickedPoint>) {
        self.adjust_hotspot = p;
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn set_mask(&mut self, mask: Option<Mask>) {
        self.mask = mask;
    }

    /// Hotspot placed with the point tool, if that is the current targeting mode.
    pub fn point_target(&self) -> Option<PickedPoint> {
        (self.tool == Tool::Point).then_some(self.edit_hotspot).flatten()
    }

    /// Painted or smart-selected mask, if a mask tool is active.
    pub fn mask_target(&self) -> Option<&Mask> {
        if self.tool.uses_mask() {
            self.mask.as_ref()
        } else {
            None
        }
    }

    /// After a commit: hotspots and the mask were placed on the previous pixels.
    pub fn clear_targets(&mut self) {
        self.edit_hotspot = None;
        self.adjust_hotspot = None;
        self.mask = None;
    }

    /// After undo/redo/revert/reset: nothing selected refers to the old state anymore.
    pub fn clear_for_navigation(&mut self) {
        self.active_layer = None;
        self.edit_hotspot = None;
        self.mask = None;
    }

    /// New image: everything but the brush preferences goes.
    pub fn clear_all(&mut self) {
        let brush_size = self.brush_size;
        *self = Self {
            brush_size,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{Bitmap, BitmapRef};
    use crate::foundation::core::{Hotspot, PixelSize, Point};

    fn layer(id: u64) -> Layer {
        Layer {
            id: LayerId::from_raw(id),
            image: BitmapRef::new(Bitmap::transparent(PixelSize::new(1, 1).unwrap())),
            prompt: String::new(),
        }
    }

    fn picked() -> PickedPoint {
        PickedPoint {
            natural: Hotspot { x: 1, y: 1 },
            displayed: Point::new(1.0, 1.0),
        }
    }

    #[test]
    fn selecting_a_layer_switches_to_brush() {
        let mut s = Selection::default();
        s.set_edit_hotspot(Some(picked()));
        s.select_layer(LayerId::from_raw(3));
        assert_eq!(s.tool(), Tool::Brush);
        assert!(s.edit_hotspot().is_none());
        assert_eq!(s.active_layer(), Some(LayerId::from_raw(3)));
    }

    #[test]
    fn targets_depend_on_tool() {
        let mut s = Selection::default();
        s.set_edit_hotspot(Some(picked()));
        assert!(s.point_target().is_some());
        s.set_tool(Tool::Erase);
        assert!(s.point_target().is_none());
    }

    #[test]
    fn retain_drops_missing_layer() {
        let mut s = Selection::default();
        s.set_active_layer(Some(LayerId::from_raw(2)));
        s.retain_layers(&[layer(1), layer(2)]);
        assert_eq!(s.active_layer(), Some(LayerId::from_raw(2)));
        s.retain_layers(&[layer(1)]);
        assert_eq!(s.active_layer(), None);
    }

    #[test]
    fn clear_all_keeps_brush_size() {
        let mut s = Selection::default();
        s.set_brush_size(12.0);
        s.set_tool(Tool::Erase);
        s.clear_all();
        assert_eq!(s.brush_size(), 12.0);
        assert_eq!(s.tool(), Tool::Point);
    }
}
