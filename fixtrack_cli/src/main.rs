use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use fixtrack::{
    calculate_activity_statistics, parse_fixes, simplify_polyline, validate_track,
    ActivityStatistics, Fix, LocationTracker, TrackLog, TrackPoint, TrackValidation,
    TrackingConfig,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "GPS fix replay and activity statistics CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay recorded GPX/FIT tracks through the fix pipeline and report statistics
    Replay(ReplayArgs),
    /// Check recorded GPX/FIT tracks for data-quality problems
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// GPX/FIT files to replay
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Tracking configuration JSON (camelCase keys, missing keys use defaults)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Disable position smoothing
    #[arg(long, action = ArgAction::SetTrue)]
    no_kalman: bool,

    /// Disable accuracy and implied-speed rejection
    #[arg(long, action = ArgAction::SetTrue)]
    no_outliers: bool,

    /// Implied speed limit (m/s)
    #[arg(long)]
    max_speed: Option<f64>,

    /// Accuracy radius limit (meters)
    #[arg(long)]
    max_accuracy: Option<f64>,

    /// Elevation smoothing window (points)
    #[arg(long)]
    smoothing_window: Option<usize>,

    /// Minimum elevation change counted as gain/loss (meters)
    #[arg(long)]
    elevation_threshold: Option<f64>,

    /// Minimum distance before the first split (meters)
    #[arg(long)]
    min_split: Option<f64>,

    /// Report the point count after Douglas-Peucker simplification at this tolerance (meters)
    #[arg(long, value_parser = parse_tolerance)]
    simplify: Option<f64>,

    /// Output JSON report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional CSV to write per-kilometre splits
    #[arg(long, value_hint = ValueHint::FilePath)]
    splits_csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// GPX/FIT files to check
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayReport {
    config_fingerprint: String,
    config: TrackingConfig,
    activities: Vec<ActivityReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivityReport {
    file: String,
    fixes: usize,
    accepted: usize,
    rejected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    simplified_points: Option<usize>,
    statistics: ActivityStatistics,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport {
    file: String,
    #[serde(flatten)]
    validation: TrackValidation,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Replay(args) => args.verbose,
        Command::Validate(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Replay(args) => handle_replay(args),
        Command::Validate(args) => handle_validate(args),
    }
}

fn handle_replay(args: ReplayArgs) -> Result<()> {
    let config = build_config(&args)?;
    let fingerprint = config.fingerprint()?;
    debug!(fingerprint = %fingerprint, "tracking configuration");

    let t_parse = Instant::now();
    let parsed = parse_inputs(&args.inputs)?;
    info!(
        "Parse stage: {:.1} ms ({} files)",
        t_parse.elapsed().as_secs_f64() * 1000.0,
        parsed.len()
    );

    let mut activities = Vec::with_capacity(parsed.len());
    for (path, fixes) in parsed {
        let activity = replay_fixes(&path.display().to_string(), fixes, &config, args.simplify)
            .with_context(|| format!("failed to replay {}", path.display()))?;
        info!(
            "{}: {:.0} m in {:.0} s, {} of {} fixes accepted",
            activity.file,
            activity.statistics.distance_m,
            activity.statistics.duration_sec,
            activity.accepted,
            activity.fixes
        );
        activities.push(activity);
    }

    if let Some(path) = args.splits_csv.as_ref() {
        write_splits_csv(&activities, path)?;
        info!("Splits written: {}", path.display());
    }

    let report = ReplayReport {
        config_fingerprint: fingerprint,
        config,
        activities,
    };
    write_json(&report, &args.output)
}

fn handle_validate(args: ValidateArgs) -> Result<()> {
    let parsed = parse_inputs(&args.inputs)?;
    let mut reports = Vec::with_capacity(parsed.len());
    let mut invalid = 0usize;
    for (path, fixes) in parsed {
        let points = to_track_points(&fixes);
        let validation = validate_track(&points);
        if !validation.is_valid {
            invalid += 1;
            for issue in &validation.errors {
                warn!("{}: {}", path.display(), issue);
            }
        }
        for issue in &validation.warnings {
            debug!("{}: {}", path.display(), issue);
        }
        reports.push(ValidationReport {
            file: path.display().to_string(),
            validation,
        });
    }
    write_json(&reports, Path::new("-"))?;
    if invalid > 0 {
        return Err(anyhow!("{} of {} tracks failed validation", invalid, reports.len()));
    }
    Ok(())
}

/// Config file (if any) first, then individual flag overrides, then bounds checks.
fn build_config(args: &ReplayArgs) -> Result<TrackingConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => load_config(path)?,
        None => TrackingConfig::default(),
    };
    if args.no_kalman {
        config.kalman_filter_enabled = false;
    }
    if args.no_outliers {
        config.outlier_detection_enabled = false;
    }
    if let Some(v) = args.max_speed {
        config.max_speed_threshold = v;
    }
    if let Some(v) = args.max_accuracy {
        config.max_accuracy_threshold = v;
    }
    if let Some(v) = args.smoothing_window {
        config.smoothing_window = v;
    }
    if let Some(v) = args.elevation_threshold {
        config.elevation_threshold = v;
    }
    if let Some(v) = args.min_split {
        config.min_split_distance = v;
    }
    config.validate()?;
    Ok(config)
}

fn parse_tolerance(input: &str) -> std::result::Result<f64, String> {
    let value: f64 = input
        .trim()
        .parse()
        .map_err(|_| format!("invalid tolerance '{}': expected meters", input))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("tolerance must be a finite value >= 0, got {}", input));
    }
    Ok(value)
}

fn load_config(path: &Path) -> Result<TrackingConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    TrackingConfig::from_json_str(&text)
        .with_context(|| format!("{} is not a valid tracking config", path.display()))
}

fn parse_inputs(inputs: &[PathBuf]) -> Result<Vec<(PathBuf, Vec<Fix>)>> {
    if inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    inputs
        .par_iter()
        .map(|path| -> Result<(PathBuf, Vec<Fix>)> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let hint = path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("gpx");
            let fixes = parse_fixes(&data, hint)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((path.clone(), fixes))
        })
        .collect()
}

/// Run one recorded track through a fresh tracking session, start to stop.
fn replay_fixes(
    name: &str,
    mut fixes: Vec<Fix>,
    config: &TrackingConfig,
    simplify_tolerance: Option<f64>,
) -> Result<ActivityReport> {
    fixes.sort_by_key(|fix| fix.timestamp);
    let (first, last) = match (fixes.first(), fixes.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return Err(anyhow!("{} contains no timestamped positions", name)),
    };

    let mut tracker = LocationTracker::new(config.clone())?;
    let mut log = TrackLog::new(tracker.subscribe());
    let rejections = tracker.subscribe_rejections();

    tracker.start(first)?;
    let accepted = fixes
        .iter()
        .filter(|fix| tracker.handle_fix(fix).is_some())
        .count();
    let timing = tracker.stop(last)?;

    log.drain();
    let rejected = rejections.try_iter().count();
    let points = log.into_points();
    let statistics =
        calculate_activity_statistics(&points, &timing, &config.statistics_options());
    let simplified_points =
        simplify_tolerance.map(|tolerance| simplify_polyline(&points, tolerance).len());

    Ok(ActivityReport {
        file: name.to_string(),
        fixes: fixes.len(),
        accepted,
        rejected,
        simplified_points,
        statistics,
    })
}

fn to_track_points(fixes: &[Fix]) -> Vec<TrackPoint> {
    fixes
        .iter()
        .enumerate()
        .map(|(i, fix)| TrackPoint::from_fix(i as u64, fix))
        .collect()
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    if path == Path::new("-") {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", text)?;
    } else {
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Report written: {}", path.display());
    }
    Ok(())
}

fn write_splits_csv(activities: &[ActivityReport], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_split_rows(activities, &mut writer)
}

fn write_split_rows<W: Write>(
    activities: &[ActivityReport],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "file",
        "km",
        "distance_m",
        "duration_s",
        "pace_s_per_km",
    ])?;
    for activity in activities {
        for split in &activity.statistics.splits {
            writer.write_record([
                activity.file.clone(),
                split.km_index.to_string(),
                format!("{:.1}", split.distance_m),
                format!("{:.1}", split.duration_sec),
                format!("{:.1}", split.pace_sec_per_km),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}
