//! The editor session: one owner of history, selection and account state.
//!
//! Remote edits run in two phases so the slow part can leave the state machine:
//! [`Editor::begin`] pre-checks the entitlement, validates, flattens and marks the editor busy;
//! [`PendingEdit::run`] talks to the model on any thread; [`Editor::finish`] commits and charges.
//! A result that comes back after the user uploaded a new image or moved through history is
//! discarded as stale, without commit and without charge.

pub mod selection;

use std::borrow::Cow;

use crate::bitmap::{Bitmap, BitmapRef};
use crate::composite::collage::CollageStyle;
use crate::composite::{self, CropRequest, ExpandCanvas, expand_canvas};
use crate::config::StudioConfig;
use crate::entitlement::{AccountContext, Entitlement, GateTicket, OperationValue, UpgradePrompt};
use crate::export::{ExportOptions, ExportedFile, encode_export, timestamp_ms};
use crate::foundation::core::{Hotspot, PickedPoint, Point, Rect, Size, Viewport};
use crate::foundation::error::{StudioError, StudioResult};
use crate::history::{ApplicationState, History};
use crate::layers::{self, Layer, LayerId, LayerIds};
use crate::mask::{BrushMode, Mask, MaskSurface};
use crate::remote::{EditTarget, ImageService, Suggestion, Variant};

pub use selection::{Selection, Tool};

/// Whole-image edits: flatten, send, replace the base.
#[derive(Clone, Debug, PartialEq)]
pub enum GlobalEdit {
    /// Free-form adjustment, optionally focused on a point. Presets decide their own value.
    Adjust {
        prompt: String,
        hotspot: Option<Hotspot>,
        value: OperationValue,
        label: String,
    },
    Filter {
        prompt: String,
    },
    Sharpen {
        intensity: u8,
    },
    StyleTransfer {
        style: Bitmap,
        intensity: u8,
    },
    RemoveBackground,
    BeautifyBackground,
    PortraitEnhance,
    PassportPhoto,
    Shadow {
        prompt: String,
        name: String,
    },
    Uncrop {
        aspect_ratio: String,
    },
    Suggestion(Suggestion),
}

impl GlobalEdit {
    pub fn value(&self) -> OperationValue {
        match self {
            Self::Adjust { value, .. } => *value,
            Self::Filter { .. } | Self::Sharpen { .. } | Self::Suggestion(_) => OperationValue::Standard,
            Self::StyleTransfer { .. }
            | Self::RemoveBackground
            | Self::BeautifyBackground
            | Self::PortraitEnhance
            | Self::PassportPhoto
            | Self::Shadow { .. }
            | Self::Uncrop { .. } => OperationValue::HighValue,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Adjust { label, .. } => label.clone(),
            Self::Filter { .. } => "Creative Filter".to_string(),
            Self::Sharpen { intensity } => format!("Sharpen ({intensity}%)"),
            Self::StyleTransfer { .. } => "Style Transfer".to_string(),
            Self::RemoveBackground => "Remove Background".to_string(),
            Self::BeautifyBackground => "Beautify Background".to_string(),
            Self::PortraitEnhance => "Auto Portrait Enhance".to_string(),
            Self::PassportPhoto => "Passport Photo".to_string(),
            Self::Shadow { name, .. } => format!("Shadow: {name}"),
            Self::Uncrop { .. } => "Uncrop & Reimagine".to_string(),
            Self::Suggestion(s) => format!("Suggestion: {}", s.title),
        }
    }

    fn failure_prefix(&self) -> &'static str {
        match self {
            Self::Uncrop { .. } => "Failed to reimagine the scene.",
            _ => "Failed to apply the edit.",
        }
    }

    fn validate(&self) -> StudioResult<()> {
        let prompt = match self {
            Self::Adjust { prompt, .. } | Self::Filter { prompt } | Self::Shadow { prompt, .. } => {
                Some(prompt.as_str())
            }
            Self::Suggestion(s) => Some(s.prompt.as_str()),
            Self::Uncrop { aspect_ratio } => {
                parse_aspect_ratio(aspect_ratio)?;
                None
            }
            _ => None,
        };
        if prompt.is_some_and(|p| p.trim().is_empty()) {
            return Err(StudioError::validation("Please enter a description for your edit."));
        }
        Ok(())
    }

    fn apply(&self, service: &ImageService, image: &Bitmap) -> StudioResult<Bitmap> {
        match self {
            Self::Adjust { prompt, hotspot, .. } => service.adjust(image, prompt, *hotspot),
            Self::Filter { prompt } => service.filter(image, prompt),
            Self::Sharpen { intensity } => service.sharpen(image, *intensity),
            Self::StyleTransfer { style, intensity } => service.style_transfer(image, style, *intensity),
            Self::RemoveBackground => service.remove_background(image),
            Self::BeautifyBackground => service.beautify_background(image),
            Self::PortraitEnhance => service.portrait_enhance(image),
            Self::PassportPhoto => service.passport_photo(image),
            Self::Shadow { prompt, .. } => service.add_shadow(image, prompt),
            Self::Uncrop { aspect_ratio } => service.uncrop(image, aspect_ratio),
            Self::Suggestion(s) => service.adjust(image, &s.prompt, None),
        }
    }
}

/// `"16:9"` style ratios with positive integer sides.
pub fn parse_aspect_ratio(s: &str) -> StudioResult<(u32, u32)> {
    let bad = || StudioError::validation(format!("invalid aspect ratio '{s}' (expected W:H)"));
    let (w, h) = s.split_once(':').ok_or_else(bad)?;
    let w: u32 = w.trim().parse().map_err(|_| bad())?;
    let h: u32 = h.trim().parse().map_err(|_| bad())?;
    if w == 0 || h == 0 {
        return Err(bad());
    }
    Ok((w, h))
}

/// Edits that go through the remote model.
#[derive(Clone, Debug, PartialEq)]
pub enum EditOp {
    /// New layer at the selected hotspot/mask, or a redo of the active layer.
    GenerateLayer { prompt: String },
    /// Inpaint away whatever the current mask covers.
    RemoveObject,
    Global(GlobalEdit),
    Expand(ExpandCanvas),
    /// Ask the model for an object mask; the result becomes the current mask.
    SmartSelect(Hotspot),
    SmartBackground,
    ProfilePictures,
    Export(ExportOptions),
}

impl EditOp {
    /// `None` for operations that are never metered.
    pub fn value(&self) -> Option<OperationValue> {
        match self {
            Self::GenerateLayer { .. } | Self::RemoveObject => Some(OperationValue::Standard),
            Self::Global(g) => Some(g.value()),
            Self::Expand(_) | Self::SmartBackground | Self::ProfilePictures => {
                Some(OperationValue::HighValue)
            }
            Self::SmartSelect(_) => None,
            Self::Export(o) => o.value(),
        }
    }

    fn failure_prefix(&self) -> &'static str {
        match self {
            Self::GenerateLayer { .. } => "Failed to generate the image.",
            Self::RemoveObject => "Failed to remove the object.",
            Self::Global(g) => g.failure_prefix(),
            Self::Expand(_) => "Failed to expand the image.",
            Self::SmartSelect(_) => "Failed to generate the selection.",
            Self::SmartBackground => "Smart Background failed.",
            Self::ProfilePictures => "Profile Picture Designer failed.",
            Self::Export(_) => "Failed to process the download.",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantKind {
    SmartBackground,
    ProfilePicture,
}

impl VariantKind {
    fn apply_description(self) -> &'static str {
        match self {
            Self::SmartBackground => "Apply Smart Background",
            Self::ProfilePicture => "Apply Profile Picture Design",
        }
    }
}

/// UI callbacks, as data.
#[derive(Clone, Debug)]
pub enum Command {
    Upload(Bitmap),
    UploadNew,
    Undo,
    Redo,
    Revert(usize),
    Reset,
    SetDisplaySize(Size),
    SetTool(Tool),
    SetBrushSize(f64),
    /// Click on the image: places the edit hotspot, or smart-selects with [`Tool::Select`].
    PickPoint(Point),
    PickAdjustPoint(Option<Point>),
    SetMask(Option<Mask>),
    SelectLayer(LayerId),
    DeselectLayer,
    DeleteLayer(LayerId),
    ReorderLayer { dragged: LayerId, target: LayerId },
    /// Crop to a rectangle in displayed pixels.
    Crop(Rect),
    Edit(EditOp),
    ApplyVariant(usize),
    DismissError,
    DismissUpgrade,
    SignIn,
    SignOut,
    PurchasePro,
    PurchaseCredits(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum EditOutcome {
    /// Editor state changed without a new history entry.
    Updated,
    Committed { description: String },
    Mask { selected_pixels: usize },
    Variants { descriptions: Vec<String> },
    Exported(Vec<ExportedFile>),
}

#[derive(Clone, Debug)]
enum Job {
    Layer {
        prompt: String,
        target: EditTarget,
        update: Option<LayerId>,
    },
    RemoveObject(Mask),
    Global(GlobalEdit),
    Expand {
        composite: Bitmap,
        fill_mask: Bitmap,
    },
    SmartSelect(Hotspot),
    Variants(VariantKind),
    Export {
        options: ExportOptions,
        original: BitmapRef,
        watermark: String,
        collage: CollageStyle,
    },
}

/// An edit that passed every local check and now only needs the model.
///
/// Owns all of its inputs, so it can be sent to a worker thread.
#[derive(Debug)]
pub struct PendingEdit {
    id: u64,
    failure_prefix: &'static str,
    source: BitmapRef,
    job: Job,
}

enum Produced {
    Layer {
        image: Bitmap,
        prompt: String,
        update: Option<LayerId>,
    },
    Base {
        image: Bitmap,
        description: String,
    },
    Mask(Option<Mask>),
    Variants(VariantKind, Vec<Variant>),
    Export(Vec<ExportedFile>),
}

/// What came back from the model, waiting for [`Editor::finish`].
pub struct EditResult {
    id: u64,
    failure_prefix: &'static str,
    produced: StudioResult<Produced>,
}

impl std::fmt::Debug for EditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditResult")
            .field("id", &self.id)
            .field("ok", &self.produced.is_ok())
            .finish()
    }
}

impl EditResult {
    pub fn is_ok(&self) -> bool {
        self.produced.is_ok()
    }
}

impl PendingEdit {
    pub fn id(&self) -> u64 {
        self.id
    }

    #[tracing::instrument(skip(self, service), fields(id = self.id))]
    pub fn run(self, service: &ImageService) -> EditResult {
        let produced = Self::produce(&self.source, self.job, service);
        if let Err(e) = &produced {
            tracing::warn!(error = %e, "edit failed");
        }
        EditResult {
            id: self.id,
            failure_prefix: self.failure_prefix,
            produced,
        }
    }

    fn produce(source: &BitmapRef, job: Job, service: &ImageService) -> StudioResult<Produced> {
        Ok(match job {
            Job::Layer {
                prompt,
                target,
                update,
            } => Produced::Layer {
                image: service.edit_layer(source, &prompt, &target)?,
                prompt,
                update,
            },
            Job::RemoveObject(mask) => Produced::Base {
                image: service.remove_object(source, &mask)?,
                description: "Remove Object".to_string(),
            },
            Job::Global(edit) => Produced::Base {
                image: edit.apply(service, source)?,
                description: edit.description(),
            },
            Job::Expand {
                composite,
                fill_mask,
            } => Produced::Base {
                image: service.expand(&composite, &fill_mask)?,
                description: "Generative Expand".to_string(),
            },
            Job::SmartSelect(at) => {
                let raw = service.smart_select(source, at)?;
                Produced::Mask(Mask::from_bitmap(&raw, source.size())?)
            }
            Job::Variants(kind) => {
                let subject = service.remove_background(source)?;
                let variants = match kind {
                    VariantKind::SmartBackground => service.smart_backgrounds(&subject)?,
                    VariantKind::ProfilePicture => service.profile_pictures(&subject)?,
                };
                Produced::Variants(kind, variants)
            }
            Job::Export {
                options,
                original,
                watermark,
                collage,
            } => {
                let mut image: Cow<'_, Bitmap> = Cow::Borrowed(source.bitmap());
                if let Some(level) = options.denoise {
                    image = Cow::Owned(service.denoise(&image, level)?);
                }
                if options.upscale {
                    image = Cow::Owned(service.upscale(&image)?);
                }
                Produced::Export(encode_export(
                    &image,
                    &original,
                    &options,
                    &watermark,
                    collage,
                    timestamp_ms(),
                )?)
            }
        })
    }
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    ticket: Option<GateTicket>,
    session: u64,
    revision: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub watermark_text: String,
    pub collage: CollageStyle,
}

impl Default for EditorSettings {
    fn default() -> Self {
        let cfg = StudioConfig::default();
        Self {
            watermark_text: cfg.watermark_text,
            collage: cfg.collage,
        }
    }
}

impl From<&StudioConfig> for EditorSettings {
    fn from(cfg: &StudioConfig) -> Self {
        Self {
            watermark_text: cfg.watermark_text.clone(),
            collage: cfg.collage,
        }
    }
}

#[derive(Debug)]
pub struct Editor {
    history: History,
    account: AccountContext,
    service: ImageService,
    settings: EditorSettings,
    selection: Selection,
    displayed: Option<Size>,
    layer_ids: LayerIds,
    session: u64,
    next_edit: u64,
    in_flight: Option<InFlight>,
    variants: Option<(VariantKind, Vec<Variant>)>,
    last_error: Option<String>,
    upgrade_prompt: Option<UpgradePrompt>,
}

impl Editor {
    pub fn new(account: AccountContext, service: ImageService, settings: EditorSettings) -> Self {
        Self {
            history: History::new(),
            account,
            service,
            settings,
            selection: Selection::default(),
            displayed: None,
            layer_ids: LayerIds::default(),
            session: 0,
            next_edit: 0,
            in_flight: None,
            variants: None,
            last_error: None,
            upgrade_prompt: None,
        }
    }

    /// Tear down, handing back the account so it can be shut down.
    pub fn into_account(self) -> AccountContext {
        self.account
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current(&self) -> Option<&ApplicationState> {
        self.history.current()
    }

    pub fn account(&self) -> &AccountContext {
        &self.account
    }

    pub fn entitlement(&self) -> Entitlement {
        self.account.entitlement()
    }

    pub fn service(&self) -> &ImageService {
        &self.service
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn upgrade_prompt(&self) -> Option<&UpgradePrompt> {
        self.upgrade_prompt.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn variants(&self) -> &[Variant] {
        self.variants.as_ref().map_or(&[], |(_, v)| v.as_slice())
    }

    /// Current image as displayed. Unscaled until a display size is reported.
    pub fn viewport(&self) -> Option<Viewport> {
        let natural = self.history.current()?.base.size();
        match self.displayed {
            Some(d) => Viewport::new(d, natural).ok(),
            None => Some(Viewport::unscaled(natural)),
        }
    }

    /// A brush surface over the current image, preloaded with the current mask.
    /// The erase tool yields a surface that removes coverage.
    pub fn mask_surface(&self) -> StudioResult<MaskSurface> {
        let vp = self.viewport().ok_or_else(no_image)?;
        let mut surface = MaskSurface::new(vp, self.selection.brush_size());
        if self.selection.tool() == Tool::Erase {
            surface.set_mode(BrushMode::Erase);
        }
        surface.load(self.selection.mask())?;
        Ok(surface)
    }

    pub fn dispatch(&mut self, cmd: Command) -> StudioResult<EditOutcome> {
        tracing::debug!(command = command_name(&cmd), "dispatch");
        match cmd {
            Command::Upload(bitmap) => {
                self.upload(bitmap);
                Ok(EditOutcome::Updated)
            }
            Command::UploadNew => {
                self.upload_new();
                Ok(EditOutcome::Updated)
            }
            Command::Undo => self.navigate(|h| {
                h.undo()
                    .then_some(())
                    .ok_or_else(|| StudioError::validation("Nothing to undo."))
            }),
            Command::Redo => self.navigate(|h| {
                h.redo()
                    .then_some(())
                    .ok_or_else(|| StudioError::validation("Nothing to redo."))
            }),
            Command::Revert(index) => self.navigate(|h| h.revert(index)),
            Command::Reset => {
                let out = self.navigate(|h| h.reset().then_some(()).ok_or_else(no_image));
                if out.is_ok() {
                    self.last_error = None;
                }
                out
            }
            Command::SetDisplaySize(size) => self.set_display_size(size),
            Command::SetTool(tool) => {
                self.selection.set_tool(tool);
                Ok(EditOutcome::Updated)
            }
            Command::SetBrushSize(size) => {
                self.selection.set_brush_size(size);
                Ok(EditOutcome::Updated)
            }
            Command::PickPoint(p) => self.pick_point(p),
            Command::PickAdjustPoint(p) => self.pick_adjust_point(p),
            Command::SetMask(mask) => self.set_mask(mask),
            Command::SelectLayer(id) => self.select_layer(id),
            Command::DeselectLayer => {
                self.selection.set_active_layer(None);
                Ok(EditOutcome::Updated)
            }
            Command::DeleteLayer(id) => self.delete_layer(id),
            Command::ReorderLayer { dragged, target } => self.reorder_layer(dragged, target),
            Command::Crop(rect) => match self.viewport() {
                Some(viewport) => self.crop(CropRequest { rect, viewport }),
                None => Err(self.record(no_image(), None)),
            },
            Command::Edit(op) => self.perform(op),
            Command::ApplyVariant(index) => self.apply_variant(index),
            Command::DismissError => {
                self.last_error = None;
                Ok(EditOutcome::Updated)
            }
            Command::DismissUpgrade => {
                self.upgrade_prompt = None;
                Ok(EditOutcome::Updated)
            }
            Command::SignIn => self.account.sign_in().map(|_| EditOutcome::Updated),
            Command::SignOut => self.account.sign_out().map(|_| EditOutcome::Updated),
            Command::PurchasePro => self.account.purchase_pro().map(|_| EditOutcome::Updated),
            Command::PurchaseCredits(n) => self
                .account
                .purchase_credits(n)
                .map(|_| EditOutcome::Updated),
        }
    }

    /// Replace whatever was loaded with a fresh original.
    pub fn upload(&mut self, bitmap: Bitmap) {
        self.reset_session();
        self.history.load(BitmapRef::new(bitmap));
    }

    pub fn upload_new(&mut self) {
        self.reset_session();
        self.history.clear();
    }

    /// Run an edit start to finish on the calling thread.
    pub fn perform(&mut self, op: EditOp) -> StudioResult<EditOutcome> {
        let pending = self.begin(op)?;
        let result = pending.run(&self.service);
        self.finish(result)
    }

    /// Check, validate and flatten. The editor stays busy until [`Editor::finish`].
    #[tracing::instrument(skip(self, op), fields(op = op_name(&op)))]
    pub fn begin(&mut self, op: EditOp) -> StudioResult<PendingEdit> {
        if self.in_flight.is_some() {
            return Err(StudioError::Busy);
        }
        self.last_error = None;

        let ticket = match op.value() {
            Some(value) => {
                let checked = self.account.gate().precheck(value);
                Some(checked.map_err(|e| self.record(e, None))?)
            }
            None => None,
        };

        let failure_prefix = op.failure_prefix();
        let (source, job) = self.prepare(op).map_err(|e| self.record(e, Some(failure_prefix)))?;

        self.next_edit += 1;
        let id = self.next_edit;
        self.in_flight = Some(InFlight {
            id,
            ticket,
            session: self.session,
            revision: self.history.revision(),
        });
        Ok(PendingEdit {
            id,
            failure_prefix,
            source,
            job,
        })
    }

    /// Apply a finished edit: commit (or store variants/mask/files), then charge.
    #[tracing::instrument(skip(self, result), fields(id = result.id))]
    pub fn finish(&mut self, result: EditResult) -> StudioResult<EditOutcome> {
        let Some(flight) = self.in_flight.take_if(|f| f.id == result.id) else {
            return Err(StudioError::validation(format!(
                "edit {} is not the edit in progress",
                result.id
            )));
        };

        if flight.session != self.session || flight.revision != self.history.revision() {
            tracing::info!(id = result.id, ok = result.is_ok(), "discarding stale edit result");
            return Err(StudioError::stale(
                "the image changed while the edit was running",
            ));
        }

        let prefix = result.failure_prefix;
        let produced = result.produced.map_err(|e| self.record(e, Some(prefix)))?;
        let outcome = self
            .apply(produced)
            .map_err(|e| self.record(e, Some(prefix)))?;

        if let Some(ticket) = flight.ticket {
            let value = ticket.value();
            if let Err(e) = self.account.gate().settle(ticket) {
                tracing::warn!(error = %e, ?value, "failed to persist edit accounting");
                self.record(e, Some("The edit was applied but your balance could not be saved."));
            }
        }
        Ok(outcome)
    }

    /// Crops are local and free.
    #[tracing::instrument(skip(self))]
    pub fn crop(&mut self, req: CropRequest) -> StudioResult<EditOutcome> {
        self.ensure_idle()?;
        let cropped = {
            let state = self.history.current().ok_or_else(no_image);
            state.and_then(|s| composite::crop(s, &req))
        };
        let cropped = cropped.map_err(|e| self.record(e, Some("Could not process the crop.")))?;
        self.commit_base(cropped, "Apply Crop")
    }

    /// Commit a variant from the last fan-out. Already paid for; never charged again.
    pub fn apply_variant(&mut self, index: usize) -> StudioResult<EditOutcome> {
        self.ensure_idle()?;
        let picked = match &self.variants {
            Some((kind, v)) if index < v.len() => Some((*kind, v[index].image.clone())),
            _ => None,
        };
        let Some((kind, image)) = picked else {
            return Err(self.record(
                StudioError::validation(format!("no generated option #{index} to apply")),
                None,
            ));
        };
        self.variants = None;
        self.commit_base(BitmapRef::new(image), kind.apply_description())
    }

    /// Read-only: never blocked by an edit in flight, never charged.
    pub fn enhance_prompt(&self, prompt: &str) -> String {
        self.service.enhance_prompt(prompt)
    }

    pub fn suggestions(&self) -> StudioResult<Vec<Suggestion>> {
        let state = self.history.current().ok_or_else(no_image)?;
        let flattened = composite::flatten(state)?;
        self.service.suggestions(&flattened)
    }

    fn prepare(&self, op: EditOp) -> StudioResult<(BitmapRef, Job)> {
        let state = self.history.current().ok_or_else(no_image)?;
        let job = match op {
            EditOp::GenerateLayer { prompt } => self.layer_job(state, prompt)?,
            EditOp::RemoveObject => {
                let mask = self.selection.mask().cloned().ok_or_else(|| {
                    StudioError::validation("Please use the brush to select an area to remove.")
                })?;
                Job::RemoveObject(mask)
            }
            EditOp::Global(edit) => {
                edit.validate()?;
                Job::Global(edit)
            }
            EditOp::Expand(target) => {
                let flat = composite::flatten(state)?;
                let (composite, fill_mask) = expand_canvas(&flat, target)?;
                return Ok((
                    flat,
                    Job::Expand {
                        composite,
                        fill_mask,
                    },
                ));
            }
            EditOp::SmartSelect(at) => {
                let size = state.base.size();
                if at.x >= size.width || at.y >= size.height {
                    return Err(StudioError::validation(format!(
                        "point ({}, {}) is outside the {}x{} image",
                        at.x, at.y, size.width, size.height
                    )));
                }
                Job::SmartSelect(at)
            }
            EditOp::SmartBackground => Job::Variants(VariantKind::SmartBackground),
            EditOp::ProfilePictures => Job::Variants(VariantKind::ProfilePicture),
            EditOp::Export(options) => {
                options.format.validate()?;
                let original = self.history.original().map(|s| s.base.clone()).ok_or_else(no_image)?;
                Job::Export {
                    options,
                    original,
                    watermark: self.settings.watermark_text.clone(),
                    collage: self.settings.collage,
                }
            }
        };
        let source = composite::flatten(state)?;
        Ok((source, job))
    }

    fn layer_job(&self, state: &ApplicationState, prompt: String) -> StudioResult<Job> {
        let update = self
            .selection
            .active_layer()
            .filter(|id| layers::position(&state.layers, *id).is_some());
        if prompt.trim().is_empty() {
            return Err(StudioError::validation(if update.is_some() {
                "Please describe your changes to the layer."
            } else {
                "Please enter a description for your edit."
            }));
        }
        let target = if let Some(p) = self.selection.point_target() {
            EditTarget::Hotspot(p.natural)
        } else if let Some(m) = self.selection.mask_target() {
            EditTarget::Mask(m.clone())
        } else if update.is_some() {
            return Err(StudioError::validation(
                "Either a hotspot or a mask is required for editing.",
            ));
        } else {
            return Err(StudioError::validation("Please select an area on the image to edit."));
        };
        Ok(Job::Layer {
            prompt,
            target,
            update,
        })
    }

    fn apply(&mut self, produced: Produced) -> StudioResult<EditOutcome> {
        match produced {
            Produced::Layer {
                image,
                prompt,
                update,
            } => {
                let state = self.history.current().ok_or_else(no_image)?;
                let image = BitmapRef::new(image);
                let (layers, id, description) = match update {
                    Some(id) => (
                        layers::update_layer(&state.layers, id, image, prompt)?,
                        id,
                        "Update Layer",
                    ),
                    None => {
                        let id = self.layer_ids.next();
                        let layer = Layer { id, image, prompt };
                        (layers::add_layer(&state.layers, layer), id, "Generate Layer")
                    }
                };
                let next = state.with_layers(layers, description);
                self.history.commit(next)?;
                self.selection.clear_targets();
                self.selection.set_active_layer(Some(id));
                Ok(EditOutcome::Committed {
                    description: description.to_string(),
                })
            }
            Produced::Base { image, description } => {
                self.commit_base(BitmapRef::new(image), &description)
            }
            Produced::Mask(mask) => {
                let selected_pixels = mask.as_ref().map_or(0, Mask::selected_pixels);
                self.selection.set_mask(mask);
                self.selection.set_tool(Tool::Brush);
                Ok(EditOutcome::Mask { selected_pixels })
            }
            Produced::Variants(kind, variants) => {
                let descriptions = variants.iter().map(|v| v.description.clone()).collect();
                self.variants = Some((kind, variants));
                Ok(EditOutcome::Variants { descriptions })
            }
            Produced::Export(files) => Ok(EditOutcome::Exported(files)),
        }
    }

    fn commit_base(&mut self, base: BitmapRef, description: &str) -> StudioResult<EditOutcome> {
        self.history
            .commit(ApplicationState::flattened(base, description))
            .map_err(|e| self.record(e, None))?;
        self.selection.retain_layers(&[]);
        self.selection.clear_targets();
        Ok(EditOutcome::Committed {
            description: description.to_string(),
        })
    }

    fn commit_layers(&mut self, layers: Vec<Layer>, description: &str) -> StudioResult<EditOutcome> {
        let next = self
            .history
            .current()
            .ok_or_else(no_image)?
            .with_layers(layers, description);
        self.history.commit(next)?;
        if let Some(state) = self.history.current() {
            self.selection.retain_layers(&state.layers);
        }
        self.selection.clear_targets();
        Ok(EditOutcome::Committed {
            description: description.to_string(),
        })
    }

    fn delete_layer(&mut self, id: LayerId) -> StudioResult<EditOutcome> {
        self.ensure_idle()?;
        let deleted = self
            .history
            .current()
            .ok_or_else(no_image)
            .and_then(|s| layers::delete_layer(&s.layers, id));
        let layers = deleted.map_err(|e| self.record(e, None))?;
        let was_active = self.selection.active_layer() == Some(id);
        let out = self.commit_layers(layers, "Delete Layer")?;
        if was_active {
            self.selection.set_tool(Tool::Point);
        }
        Ok(out)
    }

    fn reorder_layer(&mut self, dragged: LayerId, target: LayerId) -> StudioResult<EditOutcome> {
        self.ensure_idle()?;
        let reordered = self
            .history
            .current()
            .ok_or_else(no_image)
            .and_then(|s| layers::reorder(&s.layers, dragged, target));
        match reordered.map_err(|e| self.record(e, None))? {
            Some(layers) => self.commit_layers(layers, "Reorder Layers"),
            None => Ok(EditOutcome::Updated),
        }
    }

    fn select_layer(&mut self, id: LayerId) -> StudioResult<EditOutcome> {
        let present = self
            .history
            .current()
            .is_some_and(|s| layers::position(&s.layers, id).is_some());
        if !present {
            return Err(self.record(
                StudioError::validation(format!("{id} is not in the current layer stack")),
                None,
            ));
        }
        self.selection.select_layer(id);
        Ok(EditOutcome::Updated)
    }

    fn pick_point(&mut self, displayed: Point) -> StudioResult<EditOutcome> {
        let Some(vp) = self.viewport() else {
            return Err(self.record(no_image(), None));
        };
        let picked = PickedPoint::pick(&vp, displayed);
        if self.selection.tool() == Tool::Select {
            self.selection.set_mask(None);
            return self.perform(EditOp::SmartSelect(picked.natural));
        }
        self.selection.set_edit_hotspot(Some(picked));
        Ok(EditOutcome::Updated)
    }

    fn pick_adjust_point(&mut self, displayed: Option<Point>) -> StudioResult<EditOutcome> {
        let picked = match displayed {
            None => None,
            Some(p) => {
                let Some(vp) = self.viewport() else {
                    return Err(self.record(no_image(), None));
                };
                Some(PickedPoint::pick(&vp, p))
            }
        };
        self.selection.set_adjust_hotspot(picked);
        Ok(EditOutcome::Updated)
    }

    fn set_mask(&mut self, mask: Option<Mask>) -> StudioResult<EditOutcome> {
        if let (Some(m), Some(state)) = (&mask, self.history.current())
            && m.size() != state.base.size()
        {
            let err = StudioError::validation(format!(
                "mask is {}x{} but the image is {}x{}",
                m.size().width,
                m.size().height,
                state.base.width(),
                state.base.height()
            ));
            return Err(self.record(err, None));
        }
        self.selection.set_mask(mask);
        Ok(EditOutcome::Updated)
    }

    fn set_display_size(&mut self, size: Size) -> StudioResult<EditOutcome> {
        if let Some(vp) = self.viewport() {
            vp.with_displayed(size).map_err(|e| self.record(e, None))?;
        }
        self.displayed = Some(size);
        Ok(EditOutcome::Updated)
    }

    fn navigate(
        &mut self,
        step: impl FnOnce(&mut History) -> StudioResult<()>,
    ) -> StudioResult<EditOutcome> {
        step(&mut self.history).map_err(|e| self.record(e, None))?;
        self.selection.clear_for_navigation();
        self.variants = None;
        Ok(EditOutcome::Updated)
    }

    fn reset_session(&mut self) {
        self.session += 1;
        self.selection.clear_all();
        self.displayed = None;
        self.variants = None;
        self.last_error = None;
    }

    fn ensure_idle(&self) -> StudioResult<()> {
        if self.in_flight.is_some() {
            return Err(StudioError::Busy);
        }
        Ok(())
    }

    /// Route an error to the one visible slot it belongs in.
    fn record(&mut self, err: StudioError, prefix: Option<&str>) -> StudioError {
        match &err {
            StudioError::UpgradeRequired(prompt) => self.upgrade_prompt = Some(prompt.clone()),
            StudioError::Busy | StudioError::Stale(_) => {}
            StudioError::Validation(m) => self.last_error = Some(m.clone()),
            other => {
                let msg = other.user_message();
                self.last_error = Some(match prefix {
                    Some(p) => format!("{p} {msg}"),
                    None => msg,
                });
            }
        }
        err
    }
}

fn no_image() -> StudioError {
    StudioError::validation("No image loaded to edit.")
}

fn op_name(op: &EditOp) -> &'static str {
    match op {
        EditOp::GenerateLayer { .. } => "generate_layer",
        EditOp::RemoveObject => "remove_object",
        EditOp::Global(_) => "global",
        EditOp::Expand(_) => "expand",
        EditOp::SmartSelect(_) => "smart_select",
        EditOp::SmartBackground => "smart_background",
        EditOp::ProfilePictures => "profile_pictures",
        EditOp::Export(_) => "export",
    }
}

fn command_name(cmd: &Command) -> &'static str {
    match cmd {
        Command::Upload(_) => "upload",
        Command::UploadNew => "upload_new",
        Command::Undo => "undo",
        Command::Redo => "redo",
        Command::Revert(_) => "revert",
        Command::Reset => "reset",
        Command::SetDisplaySize(_) => "set_display_size",
        Command::SetTool(_) => "set_tool",
        Command::SetBrushSize(_) => "set_brush_size",
        Command::PickPoint(_) => "pick_point",
        Command::PickAdjustPoint(_) => "pick_adjust_point",
        Command::SetMask(_) => "set_mask",
        Command::SelectLayer(_) => "select_layer",
        Command::DeselectLayer => "deselect_layer",
        Command::DeleteLayer(_) => "delete_layer",
        Command::ReorderLayer { .. } => "reorder_layer",
        Command::Crop(_) => "crop",
        Command::Edit(op) => op_name(op),
        Command::ApplyVariant(_) => "apply_variant",
        Command::DismissError => "dismiss_error",
        Command::DismissUpgrade => "dismiss_upgrade",
        Command::SignIn => "sign_in",
        Command::SignOut => "sign_out",
        Command::PurchasePro => "purchase_pro",
        Command::PurchaseCredits(_) => "purchase_credits",
    }
}
