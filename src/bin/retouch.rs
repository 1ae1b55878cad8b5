use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use retouch::layers::LayerIds;
use retouch::{
    AccountContext, Bitmap, BitmapRef, Command as EditorCommand, CropRequest, EditOp, EditOutcome,
    Editor, EditorSettings, ExpandCanvas, ExportFormat, ExportOptions, GlobalEdit, ImageService,
    JsonFileStore, Layer, Mask, NoiseLevel, OperationValue, Point, Rect, StudioConfig, Viewport,
};

#[derive(Parser, Debug)]
#[command(name = "retouch", version)]
struct Cli {
    /// Config JSON (defaults apply to every missing field).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a before/after comparison collage.
    Collage(CollageArgs),
    /// Crop an image to a rectangle in natural pixels.
    Crop(CropArgs),
    /// Composite overlay images onto a base, bottom first.
    Flatten(FlattenArgs),
    /// Encode an image for download (watermark, format, comparison collage).
    Export(ExportArgs),
    /// Run a generative edit through the configured proxy.
    Edit(EditArgs),
    /// Inspect or change the local account.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
}

#[derive(Parser, Debug)]
struct CollageArgs {
    #[arg(long)]
    before: PathBuf,

    #[arg(long)]
    after: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Gap between panels in pixels (defaults to the configured style).
    #[arg(long)]
    gap: Option<u32>,

    #[arg(long)]
    no_labels: bool,
}

#[derive(Parser, Debug)]
struct CropArgs {
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[arg(long)]
    x: f64,

    #[arg(long)]
    y: f64,

    #[arg(long)]
    width: f64,

    #[arg(long)]
    height: f64,
}

#[derive(Parser, Debug)]
struct FlattenArgs {
    #[arg(long)]
    base: PathBuf,

    /// Overlay image; repeat for more layers. Stretched to the base size.
    #[arg(long = "layer")]
    layers: Vec<PathBuf>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Png,
    Jpeg,
}

#[derive(Parser, Debug)]
struct FormatArgs {
    /// Defaults to the configured `export_format`.
    #[arg(long, value_enum)]
    format: Option<FormatChoice>,

    /// JPEG quality, 1..=100. Defaults to the configured quality.
    #[arg(long)]
    quality: Option<u8>,

    /// Stamp the configured watermark text.
    #[arg(long)]
    watermark: bool,

    /// Also write a before/after collage.
    #[arg(long)]
    comparison: bool,
}

impl FormatArgs {
    /// Flags override `configured`.
    fn export_format(&self, configured: ExportFormat) -> anyhow::Result<ExportFormat> {
        let configured_quality = match configured {
            ExportFormat::Jpeg { quality } => Some(quality),
            ExportFormat::Png => None,
        };
        let jpeg = || {
            let quality = self
                .quality
                .or(configured_quality)
                .unwrap_or(retouch::export::DEFAULT_JPEG_QUALITY);
            ExportFormat::jpeg(quality)
        };
        Ok(match self.format {
            Some(FormatChoice::Png) => ExportFormat::Png,
            Some(FormatChoice::Jpeg) => jpeg()?,
            None if configured_quality.is_some() => jpeg()?,
            None => ExportFormat::Png,
        })
    }
}

#[derive(Parser, Debug)]
struct ExportArgs {
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Original image for the comparison collage (defaults to the input).
    #[arg(long)]
    original: Option<PathBuf>,

    #[arg(long)]
    out_dir: PathBuf,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Parser, Debug)]
struct EditArgs {
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Directory for the results.
    #[arg(long)]
    out_dir: PathBuf,

    #[command(subcommand)]
    op: EditChoice,
}

#[derive(Subcommand, Debug)]
enum EditChoice {
    /// Generate a new layer at a point.
    Layer {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
    },
    /// Remove what a mask image (white = selected) covers.
    RemoveObject {
        #[arg(long)]
        mask: PathBuf,
    },
    Filter {
        #[arg(long)]
        prompt: String,
    },
    Adjust {
        #[arg(long)]
        prompt: String,
        #[arg(long, requires = "y")]
        x: Option<u32>,
        #[arg(long, requires = "x")]
        y: Option<u32>,
    },
    Sharpen {
        #[arg(long, default_value_t = 50)]
        intensity: u8,
    },
    StyleTransfer {
        #[arg(long)]
        style: PathBuf,
        #[arg(long, default_value_t = 50)]
        intensity: u8,
    },
    RemoveBackground,
    BeautifyBackground,
    Portrait,
    Passport,
    Shadow {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "Custom")]
        name: String,
    },
    Uncrop {
        /// Target ratio, e.g. 16:9.
        #[arg(long)]
        aspect: String,
    },
    Expand {
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        #[arg(long, default_value_t = 0)]
        offset_x: u32,
        #[arg(long, default_value_t = 0)]
        offset_y: u32,
    },
    /// Ask the model for an object mask at a point.
    Select {
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
    },
    SmartBackground,
    ProfilePictures,
    /// Print edit suggestions for the image.
    Suggest,
    /// Rewrite a prompt into a more detailed one.
    Enhance {
        #[arg(long)]
        prompt: String,
    },
    /// Export with optional remote denoise/upscale.
    Export {
        #[command(flatten)]
        format: FormatArgs,
        #[arg(long)]
        denoise: Option<NoiseLevel>,
        #[arg(long)]
        upscale: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AccountAction {
    /// Print the current entitlement as JSON.
    Status,
    SignIn,
    SignOut,
    BuyCredits {
        #[arg(long)]
        amount: u32,
    },
    GoPro,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = match &cli.config {
        Some(path) => StudioConfig::load(path)?,
        None => StudioConfig::default(),
    };
    match cli.cmd {
        Command::Collage(args) => cmd_collage(&cfg, args),
        Command::Crop(args) => cmd_crop(args),
        Command::Flatten(args) => cmd_flatten(args),
        Command::Export(args) => cmd_export(&cfg, args),
        Command::Edit(args) => cmd_edit(&cfg, args),
        Command::Account { action } => cmd_account(&cfg, action),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn read_image(path: &Path) -> anyhow::Result<Bitmap> {
    let bytes = std::fs::read(path).with_context(|| format!("read image '{}'", path.display()))?;
    Bitmap::decode(&bytes).with_context(|| format!("decode image '{}'", path.display()))
}

fn write_png(path: &Path, bitmap: &Bitmap) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(path, bitmap.encode_png()?)
        .with_context(|| format!("write png '{}'", path.display()))?;
    eprintln!("wrote {}", path.display());
    Ok(())
}

fn cmd_collage(cfg: &StudioConfig, args: CollageArgs) -> anyhow::Result<()> {
    let before = read_image(&args.before)?;
    let after = read_image(&args.after)?;
    let mut style = cfg.collage;
    if let Some(gap) = args.gap {
        style.gap = gap;
    }
    if args.no_labels {
        style.labels = false;
    }
    let collage = retouch::comparison_collage(&before, &after, style)?;
    write_png(&args.out, &collage)
}

fn cmd_crop(args: CropArgs) -> anyhow::Result<()> {
    let image = BitmapRef::new(read_image(&args.in_path)?);
    let req = CropRequest {
        rect: Rect::new(args.x, args.y, args.x + args.width, args.y + args.height),
        viewport: Viewport::unscaled(image.size()),
    };
    let state = retouch::ApplicationState::original(image);
    let cropped = retouch::crop(&state, &req)?;
    write_png(&args.out, &cropped)
}

fn cmd_flatten(args: FlattenArgs) -> anyhow::Result<()> {
    let base = BitmapRef::new(read_image(&args.base)?);
    let mut ids = LayerIds::default();
    let mut layers = Vec::with_capacity(args.layers.len());
    for path in &args.layers {
        layers.push(Layer {
            id: ids.next(),
            image: BitmapRef::new(read_image(path)?),
            prompt: String::new(),
        });
    }
    let state = retouch::ApplicationState::original(base).with_layers(layers, "Flatten");
    let flat = retouch::flatten(&state)?;
    write_png(&args.out, &flat)
}

fn cmd_export(cfg: &StudioConfig, args: ExportArgs) -> anyhow::Result<()> {
    let processed = read_image(&args.in_path)?;
    let original = match &args.original {
        Some(p) => read_image(p)?,
        None => processed.clone(),
    };
    let options = ExportOptions {
        format: args.format.export_format(cfg.export_format)?,
        watermark: args.format.watermark,
        include_comparison: args.format.comparison,
        ..ExportOptions::default()
    };
    let files = retouch::export::encode_export(
        &processed,
        &original,
        &options,
        &cfg.watermark_text,
        cfg.collage,
        retouch::export::timestamp_ms(),
    )?;
    for file in files {
        let path = file.write_into(&args.out_dir)?;
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}

fn open_account(cfg: &StudioConfig) -> anyhow::Result<AccountContext> {
    let store = JsonFileStore::open(&cfg.account_store)?;
    Ok(AccountContext::init(Box::new(store), cfg.limits())?)
}

fn cmd_edit(cfg: &StudioConfig, args: EditArgs) -> anyhow::Result<()> {
    let input = read_image(&args.in_path)?;
    let client = cfg.proxy_client();
    tracing::debug!(url = client.url(), "using proxy");
    let service = ImageService::new(Arc::new(client))
        .with_models(cfg.image_model.clone(), cfg.text_model.clone());
    let mut editor = Editor::new(open_account(cfg)?, service, EditorSettings::from(cfg));
    editor.upload(input);

    let result = run_edit(&mut editor, args.op, &args.out_dir, cfg.export_format);
    if let Some(prompt) = editor.upgrade_prompt() {
        eprintln!("{}: {}", prompt.title, prompt.message);
    } else if let Some(msg) = editor.last_error() {
        eprintln!("{msg}");
    }
    editor.into_account().shutdown()?;
    result
}

fn run_edit(
    editor: &mut Editor,
    op: EditChoice,
    out_dir: &Path,
    configured_format: ExportFormat,
) -> anyhow::Result<()> {
    let op = match op {
        EditChoice::Suggest => {
            for s in editor.suggestions()? {
                println!("{}\t{}", s.title, s.prompt);
            }
            return Ok(());
        }
        EditChoice::Enhance { prompt } => {
            println!("{}", editor.enhance_prompt(&prompt));
            return Ok(());
        }
        EditChoice::Layer { prompt, x, y } => {
            editor.dispatch(EditorCommand::PickPoint(Point::new(x, y)))?;
            EditOp::GenerateLayer { prompt }
        }
        EditChoice::RemoveObject { mask } => {
            let size = editor
                .current()
                .map(|s| s.base.size())
                .context("no image loaded")?;
            let mask = Mask::from_bitmap(&read_image(&mask)?, size)?
                .context("the mask selects nothing")?;
            editor.dispatch(EditorCommand::SetMask(Some(mask)))?;
            EditOp::RemoveObject
        }
        EditChoice::Filter { prompt } => EditOp::Global(GlobalEdit::Filter { prompt }),
        EditChoice::Adjust { prompt, x, y } => EditOp::Global(GlobalEdit::Adjust {
            prompt,
            hotspot: x.zip(y).map(|(x, y)| retouch::Hotspot { x, y }),
            value: OperationValue::Standard,
            label: "Adjustment".to_string(),
        }),
        EditChoice::Sharpen { intensity } => EditOp::Global(GlobalEdit::Sharpen { intensity }),
        EditChoice::StyleTransfer { style, intensity } => {
            EditOp::Global(GlobalEdit::StyleTransfer {
                style: read_image(&style)?,
                intensity,
            })
        }
        EditChoice::RemoveBackground => EditOp::Global(GlobalEdit::RemoveBackground),
        EditChoice::BeautifyBackground => EditOp::Global(GlobalEdit::BeautifyBackground),
        EditChoice::Portrait => EditOp::Global(GlobalEdit::PortraitEnhance),
        EditChoice::Passport => EditOp::Global(GlobalEdit::PassportPhoto),
        EditChoice::Shadow { prompt, name } => EditOp::Global(GlobalEdit::Shadow { prompt, name }),
        EditChoice::Uncrop { aspect } => EditOp::Global(GlobalEdit::Uncrop {
            aspect_ratio: aspect,
        }),
        EditChoice::Expand {
            width,
            height,
            offset_x,
            offset_y,
        } => EditOp::Expand(ExpandCanvas {
            width,
            height,
            offset_x,
            offset_y,
        }),
        EditChoice::Select { x, y } => EditOp::SmartSelect(retouch::Hotspot { x, y }),
        EditChoice::SmartBackground => EditOp::SmartBackground,
        EditChoice::ProfilePictures => EditOp::ProfilePictures,
        EditChoice::Export {
            format,
            denoise,
            upscale,
        } => EditOp::Export(ExportOptions {
            format: format.export_format(configured_format)?,
            denoise,
            upscale,
            watermark: format.watermark,
            include_comparison: format.comparison,
        }),
    };

    let ts = retouch::export::timestamp_ms();
    match editor.perform(op)? {
        EditOutcome::Committed { description } => {
            let state = editor.current().context("no image after commit")?;
            let flat = retouch::flatten(state)?;
            tracing::info!(%description, "committed");
            let name = retouch::export::download_filename("edit", ts, "png");
            write_png(&out_dir.join(name), &flat)?;
        }
        EditOutcome::Mask { selected_pixels } => {
            tracing::info!(selected_pixels, "selection ready");
            if let Some(mask) = editor.selection().mask() {
                let name = retouch::export::download_filename("mask", ts, "png");
                write_png(&out_dir.join(name), &mask.to_bitmap()?)?;
            } else {
                eprintln!("nothing was selected");
            }
        }
        EditOutcome::Variants { descriptions } => {
            for (i, (variant, description)) in
                editor.variants().iter().zip(&descriptions).enumerate()
            {
                let name = retouch::export::download_filename(&format!("option{i}"), ts, "png");
                eprintln!("{description}:");
                write_png(&out_dir.join(name), &variant.image)?;
            }
        }
        EditOutcome::Exported(files) => {
            for file in files {
                let path = file.write_into(out_dir)?;
                eprintln!("wrote {}", path.display());
            }
        }
        EditOutcome::Updated => {}
    }
    Ok(())
}

fn cmd_account(cfg: &StudioConfig, action: AccountAction) -> anyhow::Result<()> {
    let mut account = open_account(cfg)?;
    match action {
        AccountAction::Status => {}
        AccountAction::SignIn => account.sign_in()?,
        AccountAction::SignOut => account.sign_out()?,
        AccountAction::BuyCredits { amount } => account.purchase_credits(amount)?,
        AccountAction::GoPro => account.purchase_pro()?,
    }
    let status = serde_json::json!({
        "signed_in": account.is_signed_in(),
        "entitlement": account.entitlement(),
        "free_edit_limit": account.limits().free_edit_limit,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    account.shutdown()?;
    Ok(())
}

