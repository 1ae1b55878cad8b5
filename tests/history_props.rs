use std::collections::BTreeSet;

use retouch::layers::{LayerIds, add_layer};
use retouch::{ApplicationState, Bitmap, BitmapRef, History, Layer, PixelSize};

fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn bmp(shade: u8) -> BitmapRef {
    BitmapRef::new(Bitmap::filled(
        PixelSize::new(4, 4).unwrap(),
        [shade, shade, shade, 255],
    ))
}

fn distinct_bitmaps(h: &History) -> BTreeSet<u64> {
    let mut ids = BTreeSet::new();
    for state in h.entries() {
        ids.insert(state.base.id().as_u64());
        for l in &state.layers {
            ids.insert(l.image.id().as_u64());
        }
    }
    ids
}

fn check(h: &History) {
    assert!(!h.is_empty());
    assert!(h.index() < h.len());
    assert_eq!(h.can_undo(), h.index() > 0);
    assert_eq!(h.can_redo(), h.index() + 1 < h.len());
    assert_eq!(h.redo_depth(), h.len() - h.index() - 1);

    let ids = distinct_bitmaps(h);
    assert_eq!(h.pool_stats().live_bitmaps, ids.len());
    for state in h.entries() {
        assert!(h.pool().contains(&state.base));
        assert_eq!(
            h.pool().resolve(&state.base.url()).map(|b| b.id()),
            Some(state.base.id())
        );
        for l in &state.layers {
            assert!(h.pool().contains(&l.image));
        }
    }
}

#[test]
fn random_walk_keeps_cursor_and_pool_consistent() {
    let mut h = History::new();
    let mut ids = LayerIds::default();
    h.load(bmp(0));
    check(&h);

    let mut seed = 7u64;
    for step in 0..400u32 {
        seed = mix64(seed.wrapping_add(u64::from(step)));
        let before = h.revision();
        match seed % 6 {
            0 | 1 => {
                let cur = h.current().unwrap().clone();
                let layer = Layer {
                    id: ids.next(),
                    image: bmp((seed >> 8) as u8),
                    prompt: format!("step {step}"),
                };
                let next = cur.with_layers(add_layer(&cur.layers, layer), "Generate Layer");
                let expected_len = h.index() + 2;
                h.commit(next).unwrap();
                assert_eq!(h.len(), expected_len);
                assert_eq!(h.index(), expected_len - 1);
            }
            2 => {
                h.commit(ApplicationState::flattened(bmp(step as u8), "Apply Crop"))
                    .unwrap();
                assert!(h.current().unwrap().layers.is_empty());
            }
            3 => {
                let could = h.can_undo();
                assert_eq!(h.undo(), could);
            }
            4 => {
                let could = h.can_redo();
                assert_eq!(h.redo(), could);
            }
            _ => {
                let target = (seed >> 16) as usize % h.len();
                h.revert(target).unwrap();
                assert_eq!(h.index(), target);
            }
        }
        if h.revision() == before {
            // only a refused undo/redo leaves the revision alone
            assert!(matches!(seed % 6, 3 | 4));
        }
        check(&h);
    }
}

#[test]
fn layer_commits_share_the_base_bitmap() {
    let mut h = History::new();
    let base = bmp(10);
    h.load(base.clone());
    let mut ids = LayerIds::default();
    for i in 0..3 {
        let cur = h.current().unwrap().clone();
        let layer = Layer {
            id: ids.next(),
            image: bmp(20 + i),
            prompt: String::new(),
        };
        h.commit(cur.with_layers(add_layer(&cur.layers, layer), "Generate Layer"))
            .unwrap();
    }
    assert_eq!(h.pool().ref_count(&base), 4);
    assert_eq!(h.pool_stats().live_bitmaps, 4);

    h.undo();
    h.undo();
    h.commit(ApplicationState::flattened(bmp(99), "Apply Crop"))
        .unwrap();
    // the two dropped entries held the last references to layers 2 and 3
    assert_eq!(h.len(), 3);
    assert_eq!(h.pool().ref_count(&base), 2);
    assert_eq!(h.pool_stats().live_bitmaps, 3);
    check(&h);
}

#[test]
fn out_of_range_revert_is_rejected() {
    let mut h = History::new();
    h.load(bmp(1));
    assert!(h.revert(1).is_err());
    assert_eq!(h.index(), 0);
    assert!(h.reset());
    h.clear();
    assert!(h.is_empty());
    assert!(!h.reset());
    assert_eq!(h.pool_stats().live_bitmaps, 0);
}
