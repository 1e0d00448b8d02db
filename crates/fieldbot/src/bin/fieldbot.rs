//! fieldbot CLI: one-shot tracking, manual command dispatch, field calibration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fieldbot::core::{DEFAULT_FIELD_HEIGHT, DEFAULT_FIELD_WIDTH};
use fieldbot::tracker::draw_overlay;
use fieldbot::{
    rgb_view, ColorCalibration, Command, CommandTransport, FieldMapper, FieldbotConfig,
    Homography, PoseTracker, TcpTransport, TransportConfig,
};
use nalgebra::Point2;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fieldbot")]
#[command(about = "Track the two-marker robot and drive it around the field")]
#[command(version)]
struct Cli {
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON log lines (needs the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pose tracker once on an image and print the pose as JSON.
    Track(TrackArgs),

    /// Send one command token to the robot and print its reply.
    Send(SendArgs),

    /// Compute the pixel to field homography from the four field corners.
    Homography(HomographyArgs),
}

#[derive(Debug, Clone, Args)]
struct TrackArgs {
    /// Input image (any format the `image` crate decodes).
    #[arg(long)]
    image: PathBuf,

    /// fieldbot JSON config; its tracker params, colours and homography are used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Homography file; enables the field-space pose.
    #[arg(long)]
    homography: Option<PathBuf>,

    /// Marker colour calibration JSON.
    #[arg(long)]
    colors: Option<PathBuf>,

    /// Write a debug overlay image here when the robot is found.
    #[arg(long)]
    overlay: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SendArgs {
    /// Command token, e.g. `turn_left_deg(15)` or `open_gate()`.
    token: String,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 5532)]
    port: u16,

    /// Reply timeout in seconds.
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,

    /// Connection attempts.
    #[arg(long, default_value_t = 3)]
    retries: u32,
}

#[derive(Debug, Clone, Args)]
struct HomographyArgs {
    /// Pixel corners TL, TR, BR, BL as `x1,y1,x2,y2,x3,y3,x4,y4`.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
    corners: Vec<f64>,

    /// Field width in field units.
    #[arg(long, default_value_t = DEFAULT_FIELD_WIDTH)]
    width: f64,

    /// Field height in field units.
    #[arg(long, default_value_t = DEFAULT_FIELD_HEIGHT)]
    height: f64,

    /// Output file; `.json` or plain text.
    #[arg(long)]
    out: PathBuf,
}

/// `-v` flags pick the level unless `FIELDBOT_LOG` names one.
fn init_logging(verbose: u8, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        let _ = tracing_log::LogTracer::init();
        let format = if json {
            fieldbot::core::TraceFormat::Json
        } else {
            fieldbot::core::TraceFormat::Compact
        };
        fieldbot::core::init_tracing(format);
    }
    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("--log-json needs the `tracing` feature; using plain logs");
        }
        let level = match verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        let _ = fieldbot::core::init_from_env(level);
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::Send(args) => run_send(&args),
        Commands::Homography(args) => run_homography(&args),
    }
}

fn run_track(args: &TrackArgs) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => FieldbotConfig::load_json(path)?,
        None => FieldbotConfig::default(),
    };
    let colors_path = args.colors.clone().or_else(|| config.colors_path.clone());
    let colors = ColorCalibration::load_or_default(colors_path.as_deref());

    let homography_path = args
        .homography
        .clone()
        .or_else(|| args.config.as_ref().map(|_| config.homography_path.clone()));
    let mapper = match homography_path {
        Some(path) => Some(FieldMapper::new(Homography::load(&path)?)?),
        None => None,
    };

    log::info!("loading image: {}", args.image.display());
    let img = image::open(&args.image)?.to_rgb8();
    let frame = rgb_view(&img);

    let mut tracker = PoseTracker::new(config.tracker.clone(), colors);
    let pair = tracker.update_pair(&frame);
    if pair.is_none() {
        log::warn!("no marker pair found in {}", args.image.display());
    }

    let field_pose = match (&mapper, &pair) {
        (Some(mapper), Some(pair)) => Some(mapper.map_pose(pair.front, pair.back)),
        _ => None,
    };

    if let (Some(path), Some(pair)) = (&args.overlay, &pair) {
        let overlay = draw_overlay(&frame, pair).ok_or("could not render overlay")?;
        overlay.save(path)?;
        log::info!("overlay written to {}", path.display());
    }

    let report = serde_json::json!({
        "image": args.image,
        "pair": pair,
        "pixel_pose": pair.map(|p| p.pose()),
        "field_pose": field_pose,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_send(args: &SendArgs) -> CliResult<()> {
    let command: Command = args.token.parse()?;
    let mut transport = TcpTransport::new(TransportConfig {
        host: args.host.clone(),
        port: args.port,
        timeout_s: args.timeout,
        max_retries: args.retries,
        ..TransportConfig::default()
    });

    log::info!("sending {command} to {}:{}", args.host, args.port);
    let reply = transport.send(&command);
    println!("{reply}");
    if reply.is_ok() {
        Ok(())
    } else {
        Err(format!("{command}: {reply}").into())
    }
}

fn run_homography(args: &HomographyArgs) -> CliResult<()> {
    let c = &args.corners;
    if c.len() != 8 {
        return Err(format!("expected 8 corner coordinates, got {}", c.len()).into());
    }
    let corners = [
        Point2::new(c[0], c[1]),
        Point2::new(c[2], c[3]),
        Point2::new(c[4], c[5]),
        Point2::new(c[6], c[7]),
    ];
    let h = Homography::from_field_corners(&corners, args.width, args.height)
        .ok_or("field corners are degenerate")?;
    // the control loop needs the inverse too
    FieldMapper::new(h)?;
    h.save(&args.out)?;
    log::info!("homography written to {}", args.out.display());
    Ok(())
}
