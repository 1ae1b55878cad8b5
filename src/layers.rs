//! Generative overlay layers and the pure operations on a layer stack.
//!
//! A stack is ordered bottom-first: index order is paint order and the last layer is topmost.
//! The layers panel shows the reverse ("visual") order, topmost first.

use crate::bitmap::BitmapRef;
use crate::foundation::error::{StudioError, StudioResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(u64);

impl LayerId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

impl std::str::FromStr for LayerId {
    type Err = StudioError;

    fn from_str(s: &str) -> StudioResult<Self> {
        s.strip_prefix("layer-")
            .and_then(|n| n.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| StudioError::validation(format!("invalid layer id '{s}'")))
    }
}

/// One full-canvas generative overlay.
#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    /// RGBA overlay, transparent outside the generated element.
    pub image: BitmapRef,
    /// Prompt that produced the overlay.
    pub prompt: String,
}

/// Issues layer ids that stay unique for the lifetime of an editor.
#[derive(Debug, Default)]
pub struct LayerIds {
    last: u64,
}

impl LayerIds {
    pub fn next(&mut self) -> LayerId {
        self.last += 1;
        LayerId(self.last)
    }
}

pub fn position(layers: &[Layer], id: LayerId) -> Option<usize> {
    layers.iter().position(|l| l.id == id)
}

pub fn find(layers: &[Layer], id: LayerId) -> Option<&Layer> {
    layers.iter().find(|l| l.id == id)
}

/// Topmost first, as the layers panel lists them.
pub fn visual_order(layers: &[Layer]) -> Vec<LayerId> {
    layers.iter().rev().map(|l| l.id).collect()
}

pub fn add_layer(layers: &[Layer], layer: Layer) -> Vec<Layer> {
    let mut out = layers.to_vec();
    out.push(layer);
    out
}

pub fn update_layer(
    layers: &[Layer],
    id: LayerId,
    image: BitmapRef,
    prompt: impl Into<String>,
) -> StudioResult<Vec<Layer>> {
    let i = position(layers, id).ok_or_else(|| missing(id))?;
    let mut out = layers.to_vec();
    out[i] = Layer {
        id,
        image,
        prompt: prompt.into(),
    };
    Ok(out)
}

pub fn delete_layer(layers: &[Layer], id: LayerId) -> StudioResult<Vec<Layer>> {
    let i = position(layers, id).ok_or_else(|| missing(id))?;
    let mut out = layers.to_vec();
    out.remove(i);
    Ok(out)
}

/// Move `dragged` so it sits next to `target` in the visual order.
///
/// The dragged layer lands on the far side of the target from where it started: dragged up from
/// below, it ends directly above the target; dragged down from above, directly below it.
/// Returns `None` when the order would not change.
pub fn reorder(layers: &[Layer], dragged: LayerId, target: LayerId) -> StudioResult<Option<Vec<Layer>>> {
    let from = position(layers, dragged).ok_or_else(|| missing(dragged))?;
    let to = position(layers, target).ok_or_else(|| missing(target))?;
    if from == to {
        return Ok(None);
    }

    let mut out = layers.to_vec();
    let moved = out.remove(from);
    let t = position(&out, target).ok_or_else(|| missing(target))?;
    if from < to {
        out.insert(t + 1, moved);
    } else {
        out.insert(t, moved);
    }

    let changed = out.iter().zip(layers).any(|(a, b)| a.id != b.id);
    Ok(changed.then_some(out))
}

fn missing(id: LayerId) -> StudioError {
    StudioError::validation(format!("{id} is not in the current layer stack"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::Bitmap;
    use crate::foundation::core::PixelSize;

    fn stack(n: u64) -> Vec<Layer> {
        (1..=n)
            .map(|i| Layer {
                id: LayerId(i),
                image: BitmapRef::new(Bitmap::transparent(PixelSize::new(1, 1).unwrap())),
                prompt: format!("p{i}"),
            })
            .collect()
    }

    fn ids(layers: &[Layer]) -> Vec<u64> {
        layers.iter().map(|l| l.id.0).collect()
    }

    #[test]
    fn add_paints_on_top() {
        let base = stack(2);
        let mut next_ids = LayerIds { last: 2 };
        let extra = Layer {
            id: next_ids.next(),
            ..base[0].clone()
        };
        assert_eq!(ids(&add_layer(&base, extra)), vec![1, 2, 3]);
        assert_eq!(ids(&base), vec![1, 2]);
    }

    #[test]
    fn update_keeps_position() {
        let base = stack(3);
        let img = BitmapRef::new(Bitmap::transparent(PixelSize::new(1, 1).unwrap()));
        let out = update_layer(&base, LayerId(2), img.clone(), "new").unwrap();
        assert_eq!(ids(&out), vec![1, 2, 3]);
        assert_eq!(out[1].prompt, "new");
        assert!(BitmapRef::ptr_eq(&out[1].image, &img));
        assert!(update_layer(&base, LayerId(9), img, "x").is_err());
    }

    #[test]
    fn delete_by_id() {
        assert_eq!(ids(&delete_layer(&stack(3), LayerId(2)).unwrap()), vec![1, 3]);
        assert!(delete_layer(&stack(3), LayerId(7)).is_err());
    }

    #[test]
    fn drag_up_lands_directly_above_target() {
        // visual [4,3,2,1]; drag 1 onto 3
        let out = reorder(&stack(4), LayerId(1), LayerId(3)).unwrap().unwrap();
        assert_eq!(ids(&out), vec![2, 3, 1, 4]);
        let v: Vec<u64> = visual_order(&out).iter().map(|i| i.0).collect();
        assert_eq!(v, vec![4, 1, 3, 2]);
    }

    #[test]
    fn drag_down_lands_directly_below_target() {
        // visual [4,3,2,1]; drag 4 onto 2
        let out = reorder(&stack(4), LayerId(4), LayerId(2)).unwrap().unwrap();
        assert_eq!(ids(&out), vec![1, 4, 2, 3]);
        let v: Vec<u64> = visual_order(&out).iter().map(|i| i.0).collect();
        assert_eq!(v, vec![3, 2, 4, 1]);
    }

    #[test]
    fn adjacent_swaps_both_directions() {
        assert_eq!(
            ids(&reorder(&stack(2), LayerId(1), LayerId(2)).unwrap().unwrap()),
            vec![2, 1]
        );
        assert_eq!(
            ids(&reorder(&stack(2), LayerId(2), LayerId(1)).unwrap().unwrap()),
            vec![2, 1]
        );
    }

    #[test]
    fn dropping_onto_itself_is_noop() {
        assert!(reorder(&stack(3), LayerId(2), LayerId(2)).unwrap().is_none());
        assert!(reorder(&stack(3), LayerId(2), LayerId(8)).is_err());
    }

    #[test]
    fn layer_id_string_form() {
        let id = LayerId(42);
        assert_eq!(id.to_string(), "layer-42");
        assert_eq!("layer-42".parse::<LayerId>().unwrap(), id);
        assert!("42".parse::<LayerId>().is_err());
    }
}
