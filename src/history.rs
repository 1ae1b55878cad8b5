//! Linear, truncate-on-branch edit history.
//!
//! Every entry is an immutable [`ApplicationState`]. The history owns the [`BitmapPool`]: each
//! entry retains its base and layer bitmaps when it is appended and releases them when it is
//! discarded (truncation, [`History::load`], [`History::clear`] or drop).

use crate::bitmap::BitmapRef;
use crate::bitmap::pool::{BitmapPool, BitmapPoolStats};
use crate::foundation::error::{StudioError, StudioResult};
use crate::layers::Layer;

pub const ORIGINAL_LABEL: &str = "Original";

/// One immutable point in the edit history.
#[derive(Clone, Debug)]
pub struct ApplicationState {
    /// Fully flattened image.
    pub base: BitmapRef,
    /// Generative overlays not yet flattened into `base`, bottom first.
    pub layers: Vec<Layer>,
    /// Human-readable label of the edit that produced this state.
    pub description: String,
}

impl ApplicationState {
    pub fn original(image: BitmapRef) -> Self {
        Self {
            base: image,
            layers: Vec::new(),
            description: ORIGINAL_LABEL.to_string(),
        }
    }

    /// Same base, different layer stack.
    pub fn with_layers(&self, layers: Vec<Layer>, description: impl Into<String>) -> Self {
        Self {
            base: self.base.clone(),
            layers,
            description: description.into(),
        }
    }

    /// A new flattened base with an empty layer stack.
    pub fn flattened(base: BitmapRef, description: impl Into<String>) -> Self {
        Self {
            base,
            layers: Vec::new(),
            description: description.into(),
        }
    }

    fn bitmaps(&self) -> impl Iterator<Item = &BitmapRef> {
        std::iter::once(&self.base).chain(self.layers.iter().map(|l| &l.image))
    }
}

#[derive(Debug, Default)]
pub struct History {
    entries: Vec<ApplicationState>,
    index: usize,
    pool: BitmapPool,
    revision: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a single original entry.
    #[tracing::instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn load(&mut self, image: BitmapRef) {
        self.release_from(0);
        self.push(ApplicationState::original(image));
        self.index = 0;
        self.bump();
    }

    /// Append `state` after the cursor, dropping any redo branch first.
    #[tracing::instrument(skip(self, state), fields(description = %state.description, layers = state.layers.len()))]
    pub fn commit(&mut self, state: ApplicationState) -> StudioResult<()> {
        if self.entries.is_empty() {
            return Err(StudioError::validation("no image loaded to edit"));
        }
        let dropped = self.entries.len() - self.index - 1;
        self.release_from(self.index + 1);
        self.push(state);
        self.index = self.entries.len() - 1;
        self.bump();
        tracing::debug!(dropped, len = self.entries.len(), "committed history entry");
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.index -= 1;
        self.bump();
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.index += 1;
        self.bump();
        true
    }

    /// Jump to any existing entry. Later entries are kept.
    pub fn revert(&mut self, index: usize) -> StudioResult<()> {
        if index >= self.entries.len() {
            return Err(StudioError::validation(format!(
                "history index {index} is out of range (len {})",
                self.entries.len()
            )));
        }
        self.index = index;
        self.bump();
        Ok(())
    }

    /// Back to the original upload. Later entries stay available for redo.
    pub fn reset(&mut self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        self.index = 0;
        self.bump();
        true
    }

    /// Forget the image entirely.
    pub fn clear(&mut self) {
        self.release_from(0);
        self.index = 0;
        self.bump();
    }

    pub fn current(&self) -> Option<&ApplicationState> {
        self.entries.get(self.index)
    }

    pub fn original(&self) -> Option<&ApplicationState> {
        self.entries.first()
    }

    pub fn entries(&self) -> &[ApplicationState] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cursor position. Meaningless while the history is empty.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.entries.len().saturating_sub(self.index + 1)
    }

    /// Changes whenever the cursor or the entries change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pool(&self) -> &BitmapPool {
        &self.pool
    }

    pub fn pool_stats(&self) -> BitmapPoolStats {
        self.pool.stats()
    }

    fn push(&mut self, state: ApplicationState) {
        for b in state.bitmaps() {
            self.pool.retain(b);
        }
        self.entries.push(state);
    }

    fn release_from(&mut self, start: usize) {
        if start >= self.entries.len() {
            return;
        }
        for state in self.entries.drain(start..) {
            for b in state.bitmaps() {
                self.pool.release(b);
            }
        }
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

impl Drop for History {
    fn drop(&mut self) {
        self.release_from(0);
    }
}
