use retouch::composite::text::apply_watermark;
use retouch::{
    ApplicationState, Bitmap, BitmapRef, CollageStyle, CropRequest, ExpandCanvas, Layer, LayerId,
    PixelSize, Rect, Size, Viewport, comparison_collage, crop, expand_canvas, flatten,
};

fn px(w: u32, h: u32) -> PixelSize {
    PixelSize::new(w, h).unwrap()
}

fn plain() -> CollageStyle {
    CollageStyle {
        labels: false,
        ..CollageStyle::default()
    }
}

#[test]
fn landscape_collage_is_side_by_side() {
    let before = Bitmap::filled(px(50, 25), [255, 0, 0, 255]);
    let after = Bitmap::filled(px(200, 100), [0, 0, 255, 255]);
    let out = comparison_collage(&before, &after, plain()).unwrap();
    assert_eq!(out.size(), px(408, 100));
    // before is stretched to the after panel
    assert_eq!(out.pixel(199, 99), Some([255, 0, 0, 255]));
    assert_eq!(out.pixel(204, 50), Some([0x16, 0x19, 0x28, 0xFF]));
    assert_eq!(out.pixel(208, 0), Some([0, 0, 255, 255]));
}

#[test]
fn portrait_collage_is_stacked() {
    let before = Bitmap::filled(px(100, 200), [0, 255, 0, 255]);
    let after = Bitmap::filled(px(100, 200), [0, 0, 0, 255]);
    let out = comparison_collage(&before, &after, plain()).unwrap();
    assert_eq!(out.size(), px(100, 408));
    assert_eq!(out.pixel(50, 199), Some([0, 255, 0, 255]));
    assert_eq!(out.pixel(50, 208), Some([0, 0, 0, 255]));
}

#[test]
fn labelled_collage_keeps_its_size() {
    let img = Bitmap::filled(px(120, 80), [40, 40, 40, 255]);
    let out = comparison_collage(&img, &img, CollageStyle::default()).unwrap();
    assert_eq!(out.size(), px(248, 80));
}

#[test]
fn crop_maps_displayed_selection_to_natural_pixels() {
    let mut base = Bitmap::filled(px(200, 100), [0, 0, 0, 255]);
    // mark natural pixel (100, 50)
    let i = (50 * 200 + 100) * 4;
    base.data_mut()[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
    let state = ApplicationState::original(BitmapRef::new(base));

    // displayed at half size: (50, 25)..(100, 50) covers natural (100, 50)..(200, 100)
    let viewport = Viewport::new(Size::new(100.0, 50.0), px(200, 100)).unwrap();
    let req = CropRequest {
        rect: Rect::new(50.0, 25.0, 100.0, 50.0),
        viewport,
    };
    let out = crop(&state, &req).unwrap();
    assert_eq!(out.size(), px(100, 50));
    assert_eq!(out.pixel(0, 0), Some([255, 255, 255, 255]));
    assert_eq!(out.pixel(1, 0), Some([0, 0, 0, 255]));
}

#[test]
fn crop_of_empty_selection_is_a_validation_error() {
    let state =
        ApplicationState::original(BitmapRef::new(Bitmap::transparent(px(10, 10))));
    let req = CropRequest {
        rect: Rect::new(4.0, 4.0, 4.0, 9.0),
        viewport: Viewport::unscaled(px(10, 10)),
    };
    let err = crop(&state, &req).unwrap_err();
    assert_eq!(err.user_message(), "Please select an area to crop.");
}

#[test]
fn flatten_applies_layers_bottom_first() {
    let base = BitmapRef::new(Bitmap::filled(px(4, 4), [0, 0, 0, 255]));
    let red = Bitmap::filled(px(4, 4), [255, 0, 0, 255]);
    let mut half_green = Bitmap::transparent(px(4, 4));
    half_green.data_mut()[..4].copy_from_slice(&[0, 255, 0, 255]);

    let layers = vec![
        Layer {
            id: LayerId::from_raw(1),
            image: BitmapRef::new(red),
            prompt: String::new(),
        },
        Layer {
            id: LayerId::from_raw(2),
            image: BitmapRef::new(half_green),
            prompt: String::new(),
        },
    ];
    let state = ApplicationState::original(base.clone()).with_layers(layers, "Generate Layer");
    let out = flatten(&state).unwrap();
    assert_eq!(out.pixel(0, 0), Some([0, 255, 0, 255]));
    assert_eq!(out.pixel(1, 0), Some([255, 0, 0, 255]));

    let bare = ApplicationState::original(base.clone());
    assert!(BitmapRef::ptr_eq(&flatten(&bare).unwrap(), &base));
}

#[test]
fn expand_builds_matching_fill_mask() {
    let img = Bitmap::filled(px(2, 2), [9, 9, 9, 255]);
    let target = ExpandCanvas {
        width: 4,
        height: 3,
        offset_x: 1,
        offset_y: 1,
    };
    let (composite, mask) = expand_canvas(&img, target).unwrap();
    assert_eq!(composite.size(), px(4, 3));
    assert_eq!(composite.pixel(0, 0), Some([0, 0, 0, 0]));
    assert_eq!(composite.pixel(1, 1), Some([9, 9, 9, 255]));
    assert_eq!(mask.pixel(0, 0), Some([255, 255, 255, 255]));
    assert_eq!(mask.pixel(2, 2), Some([0, 0, 0, 255]));

    let too_far = ExpandCanvas {
        offset_x: 3,
        ..target
    };
    assert!(expand_canvas(&img, too_far).is_err());
}

#[test]
fn watermark_marks_the_bottom_right_only() {
    let img = Bitmap::filled(px(400, 200), [30, 30, 30, 255]);
    let marked = apply_watermark(&img, "Made with Retouch").unwrap();
    assert_eq!(marked.size(), img.size());
    assert_eq!(marked.pixel(0, 0), img.pixel(0, 0));
    assert_eq!(apply_watermark(&img, "  ").unwrap(), img);
}
