#![forbid(unsafe_code)]

pub mod bitmap;
pub mod composite;
pub mod config;
pub mod editor;
pub mod entitlement;
pub mod export;
pub mod foundation;
pub mod history;
pub mod layers;
pub mod mask;
pub mod remote;

pub use bitmap::{Bitmap, BitmapRef, EncodedImage};
pub use composite::collage::{CollageStyle, comparison_collage};
pub use composite::{CropRequest, ExpandCanvas, crop, expand_canvas, flatten};
pub use config::StudioConfig;
pub use editor::{
    Command, EditOp, EditOutcome, EditResult, Editor, EditorSettings, GlobalEdit, PendingEdit,
    Selection, Tool,
};
pub use entitlement::{
    AccountContext, AccountLimits, Entitlement, JsonFileStore, KeyValueStore, MemoryStore,
    OperationValue, UpgradePrompt,
};
pub use export::{ExportFormat, ExportOptions, ExportedFile};
pub use foundation::core::{Hotspot, PickedPoint, PixelSize, Point, Rect, Size, Viewport};
pub use foundation::error::{StudioError, StudioResult};
pub use history::{ApplicationState, History};
pub use layers::{Layer, LayerId};
pub use mask::{BrushMode, Mask, MaskSurface};
pub use remote::proxy::ProxyClient;
pub use remote::{GenerativeModel, ImageService, ModelReply, NoiseLevel, Suggestion, Variant};
