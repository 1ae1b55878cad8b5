use std::collections::HashMap;

use crate::bitmap::{BitmapId, BitmapRef};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BitmapPoolStats {
    /// Distinct bitmaps currently resolvable by URL.
    pub live_bitmaps: usize,
    /// Pixel bytes held by live bitmaps.
    pub live_bytes: usize,
    pub retains: u64,
    pub releases: u64,
    /// Bitmaps whose last reference was released.
    pub freed: u64,
}

#[derive(Debug)]
struct PoolEntry {
    bitmap: BitmapRef,
    refs: u32,
}

/// Reference-counted registry of the bitmaps backing history entries.
///
/// History entries that share a bitmap (a layer edit keeps the base, a new layer keeps the older
/// layers) each hold one reference. A bitmap's URL stops resolving once its last holder
/// releases it.
#[derive(Debug, Default)]
pub struct BitmapPool {
    entries: HashMap<BitmapId, PoolEntry>,
    stats: BitmapPoolStats,
}

impl BitmapPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BitmapPoolStats {
        self.stats.clone()
    }

    pub fn retain(&mut self, bitmap: &BitmapRef) {
        self.stats.retains = self.stats.retains.saturating_add(1);
        match self.entries.get_mut(&bitmap.id()) {
            Some(e) => e.refs = e.refs.saturating_add(1),
            None => {
                self.stats.live_bitmaps += 1;
                self.stats.live_bytes = self
                    .stats
                    .live_bytes
                    .saturating_add(bitmap.size().byte_len());
                self.entries.insert(
                    bitmap.id(),
                    PoolEntry {
                        bitmap: bitmap.clone(),
                        refs: 1,
                    },
                );
            }
        }
    }

    /// Drop one reference. Releasing an unknown bitmap is a no-op and returns `false`.
    pub fn release(&mut self, bitmap: &BitmapRef) -> bool {
        let id = bitmap.id();
        let Some(e) = self.entries.get_mut(&id) else {
            tracing::warn!(bitmap = %id, "release of a bitmap the pool does not hold");
            return false;
        };
        self.stats.releases = self.stats.releases.saturating_add(1);
        e.refs -= 1;
        if e.refs == 0 {
            let bytes = e.bitmap.size().byte_len();
            self.entries.remove(&id);
            self.stats.live_bitmaps -= 1;
            self.stats.live_bytes = self.stats.live_bytes.saturating_sub(bytes);
            self.stats.freed = self.stats.freed.saturating_add(1);
        }
        true
    }

    pub fn ref_count(&self, bitmap: &BitmapRef) -> u32 {
        self.entries.get(&bitmap.id()).map_or(0, |e| e.refs)
    }

    pub fn contains(&self, bitmap: &BitmapRef) -> bool {
        self.entries.contains_key(&bitmap.id())
    }

    /// Dereference a `blob:retouch/<id>` URL.
    pub fn resolve(&self, url: &str) -> Option<BitmapRef> {
        let id = url.strip_prefix("blob:retouch/")?.parse::<u64>().ok()?;
        self.entries
            .get(&BitmapId::from_raw(id))
            .map(|e| e.bitmap.clone())
    }
}
