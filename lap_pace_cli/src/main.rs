use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use lap_pace::{
    clean_laps, latest_completed_event, Color, ComparativeRenderer, EventMetadata, EventSelector,
    FileSessionProvider, PaceParams, RenderedFigure, SeasonPalette, SessionData, SessionKind,
    SessionProvider, SessionRef,
};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod chart;

use chart::{render_chart_guard, ChartKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Lap-by-lap and average pace plots for a motorsport session", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the average-pace and lap-by-lap pace figure for one session
    Plot(PlotArgs),
    /// List the events of a season
    Schedule(ScheduleArgs),
}

#[derive(Parser, Debug)]
struct PlotArgs {
    /// Session archive root (`<root>/<year>/schedule.json`)
    #[arg(long, default_value = "data", value_hint = ValueHint::DirPath)]
    data_dir: PathBuf,

    /// Season to analyse (defaults to the current year)
    #[arg(short, long)]
    year: Option<i32>,

    /// Round number or event name (defaults to the latest completed event)
    #[arg(short, long)]
    track: Option<String>,

    /// Session of the weekend: R, Q, S, FP1, FP2 or FP3
    #[arg(long, default_value = "R")]
    session: String,

    /// Drivers to compare, in legend order (defaults to the classification)
    #[arg(short, long, num_args = 1..)]
    drivers: Vec<String>,

    /// File holding a comma separated driver list; ignored when --drivers is given
    #[arg(long, value_hint = ValueHint::FilePath)]
    drivers_file: Option<PathBuf>,

    /// Output PNG path (defaults to `{year}-{country}-{session}.png`, under `outputs/` when it exists)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Per-driver summary CSV (`-` for stdout)
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary: Option<PathBuf>,

    /// JSON file with analysis parameters
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// JSON object of team name to `#rrggbb`, overriding the season palette
    #[arg(long, value_hint = ValueHint::FilePath)]
    team_colors: Option<PathBuf>,

    /// IQR multiplier for outlier rejection
    #[arg(long)]
    iqr_multiplier: Option<f64>,

    /// Degree of the pace trend polynomial
    #[arg(long)]
    degree: Option<usize>,

    /// Team whose presence switches the trend panel background
    #[arg(long)]
    highlight_team: Option<String>,

    /// Wipe the parsed-session cache before loading
    #[arg(long, action = ArgAction::SetTrue)]
    clear_cache: bool,

    /// Bypass the parsed-session cache
    #[arg(long, action = ArgAction::SetTrue)]
    no_cache: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct ScheduleArgs {
    /// Session archive root
    #[arg(long, default_value = "data", value_hint = ValueHint::DirPath)]
    data_dir: PathBuf,

    /// Season to list (defaults to the current year)
    #[arg(short, long)]
    year: Option<i32>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Plot(args) => args.verbose,
        Command::Schedule(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Plot(args) => handle_plot(args),
        Command::Schedule(args) => handle_schedule(args),
    }
}

fn handle_plot(args: PlotArgs) -> Result<()> {
    let mut params = match args.config.as_ref() {
        Some(path) => load_params(path)?,
        None => PaceParams::default(),
    };
    if let Some(multiplier) = args.iqr_multiplier {
        params.iqr_multiplier = multiplier;
    }
    if let Some(degree) = args.degree {
        params.trend_degree = degree;
    }
    if let Some(team) = args.highlight_team.as_ref() {
        params.highlight_team = team.clone();
    }
    params.validate()?;

    let today = Utc::now().date_naive();
    let year = args.year.unwrap_or_else(|| today.year());
    let session_kind: SessionKind = args.session.parse()?;
    let provider = FileSessionProvider::new(&args.data_dir);

    let event = match args.track.as_ref() {
        Some(track) => EventSelector::parse(track),
        None => {
            let schedule = provider.schedule(year)?;
            let latest = latest_completed_event(&schedule, today)
                .ok_or_else(|| anyhow!("no event of {} has taken place yet", year))?;
            info!("Latest event is: {}", latest.name);
            EventSelector::Round(latest.round)
        }
    };
    let session_ref = SessionRef {
        year,
        event,
        session: session_kind,
    };
    let metadata = provider.event_metadata(&session_ref)?;

    let cache_dir = PathBuf::from(".cache").join("sessions");
    if args.clear_cache && cache_dir.exists() {
        fs::remove_dir_all(&cache_dir)
            .with_context(|| format!("failed to clear cache {}", cache_dir.display()))?;
        info!("Cleared session cache {}", cache_dir.display());
    }

    let t_load = Instant::now();
    let session_path = provider.session_path(&session_ref)?;
    let data = if args.no_cache {
        FileSessionProvider::read_session_file(&session_path)?
    } else {
        load_session_cached(&session_path, &cache_dir)?
    };
    if data.laps.is_empty() {
        return Err(lap_pace::PaceError::SessionUnavailable(format!(
            "{} {} has no recorded laps",
            metadata.name, metadata.session
        ))
        .into());
    }
    if args.profile || args.verbose {
        info!(
            "Load stage: {:.1} ms ({} laps)",
            t_load.elapsed().as_secs_f64() * 1000.0,
            data.laps.len()
        );
    }

    let mut palette = SeasonPalette::for_season(year);
    if let Some(path) = args.team_colors.as_ref() {
        palette = palette.with_overrides(&load_team_colors(path)?);
    }
    if palette.is_empty() {
        warn!("No team colours for {}; every team uses the fallback colour", year);
    } else {
        debug!("Team palette for {}: {} entries", year, palette.len());
    }

    let t_compute = Instant::now();
    let cleaned = clean_laps(&data.laps, params.iqr_multiplier);
    let order = resolve_driver_order(&args.drivers, args.drivers_file.as_deref(), &data)?;
    if order.is_empty() {
        return Err(anyhow!("no drivers to plot"));
    }
    let figure = ComparativeRenderer::new(&params, &palette).render(&cleaned, &order, &metadata.name);
    if args.profile || args.verbose {
        info!(
            "Compute stage: {:.1} ms ({} trends)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            figure.trends.len()
        );
    }
    info!(
        "{} {}: {} drivers, {} trend lines, {} skipped",
        metadata.name,
        metadata.session,
        order.len(),
        figure.trends.len(),
        figure.skipped.len()
    );

    if let Some(path) = args.summary.as_ref() {
        if path.as_os_str() == "-" {
            write_summary_stdout(&figure)?;
        } else {
            write_summary_csv(&figure, path)?;
            info!("Wrote summary CSV: {}", path.display());
        }
    }

    if !args.no_plot {
        let png_path = args
            .output
            .clone()
            .unwrap_or_else(|| default_figure_path(&metadata, ChartKind::Png));
        let t_plot = Instant::now();
        if let Err(err) = render_chart_guard(&figure, &png_path, ChartKind::Png) {
            warn!("Skipping PNG render ({}): {}", png_path.display(), err);
        } else {
            info!("Wrote plot: {}", png_path.display());
        }
        if args.profile || args.verbose {
            info!(
                "Plot stage: {:.1} ms",
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }

        if let Some(path) = args.svg.as_ref() {
            if let Err(err) = render_chart_guard(&figure, path, ChartKind::Svg) {
                warn!("Skipping SVG render ({}): {}", path.display(), err);
            } else {
                info!("Wrote plot: {}", path.display());
            }
        }
    }

    Ok(())
}

fn handle_schedule(args: ScheduleArgs) -> Result<()> {
    let year = args.year.unwrap_or_else(|| Utc::now().year());
    let provider = FileSessionProvider::new(&args.data_dir);
    let schedule = provider.schedule(year)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for event in &schedule {
        writeln!(
            handle,
            "{:>2}  {}  {:<30} {}",
            event.round, event.date, event.name, event.country
        )?;
    }
    Ok(())
}

/// Explicit drivers win, then the drivers file, then the classification
/// (or first appearance in the lap data when no classification is recorded).
fn resolve_driver_order(
    drivers: &[String],
    drivers_file: Option<&Path>,
    data: &SessionData,
) -> Result<Vec<String>> {
    if !drivers.is_empty() {
        return Ok(normalise_drivers(drivers.iter().map(String::as_str)));
    }
    if let Some(path) = drivers_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read drivers file {}", path.display()))?;
        let parsed = normalise_drivers(text.split(','));
        if parsed.is_empty() {
            warn!("Drivers file {} listed no drivers", path.display());
        } else {
            return Ok(parsed);
        }
    }
    if !data.classification.is_empty() {
        return Ok(data.classification.clone());
    }
    let mut seen: Vec<String> = Vec::new();
    for lap in &data.laps {
        if !seen.contains(&lap.driver) {
            seen.push(lap.driver.clone());
        }
    }
    Ok(seen)
}

fn normalise_drivers<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokens {
        let driver = token.trim().to_ascii_uppercase();
        if !driver.is_empty() && !out.contains(&driver) {
            out.push(driver);
        }
    }
    out
}

fn default_figure_path(metadata: &EventMetadata, kind: ChartKind) -> PathBuf {
    let filename = format!("{}.{}", metadata.file_stem(), kind.extension());
    let outputs = PathBuf::from("outputs");
    if outputs.is_dir() {
        outputs.join(filename)
    } else {
        PathBuf::from(filename)
    }
}

fn load_params(path: &Path) -> Result<PaceParams> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let params: PaceParams = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid parameter file", path.display()))?;
    Ok(params)
}

fn load_team_colors(path: &Path) -> Result<HashMap<String, Color>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read team colours {}", path.display()))?;
    let json: JsonValue = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let object = json
        .as_object()
        .ok_or_else(|| anyhow!("team colours must be a JSON object"))?;
    let mut colors = HashMap::new();
    for (team, value) in object {
        let hex = value
            .as_str()
            .ok_or_else(|| anyhow!("colour for '{}' must be a \"#rrggbb\" string", team))?;
        let color = Color::from_hex(hex).with_context(|| format!("bad colour for '{}'", team))?;
        colors.insert(team.clone(), color);
    }
    if colors.is_empty() {
        warn!("Team colour file {} had no entries", path.display());
    }
    Ok(colors)
}

fn cache_key(path: &Path) -> Result<String> {
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let dur = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(meta.len().to_le_bytes());
    hasher.update(dur.as_secs().to_le_bytes());
    hasher.update(dur.subsec_nanos().to_le_bytes());
    let digest = hasher.finalize();
    Ok(digest.iter().take(8).map(|b| format!("{:02x}", b)).collect())
}

fn read_cache(dir: &Path, key: &str) -> Option<SessionData> {
    let path = dir.join(format!("{}.json", key));
    let text = fs::read_to_string(&path).ok()?;
    serde_json::from_str(&text).ok()
}

fn write_cache(dir: &Path, key: &str, data: &SessionData) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.json", key));
    let text = serde_json::to_string(data)?;
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn load_session_cached(session_path: &Path, cache_dir: &Path) -> Result<SessionData> {
    // A missing session file must surface as SessionUnavailable, not a stat error.
    if !session_path.exists() {
        return Ok(FileSessionProvider::read_session_file(session_path)?);
    }
    let key = cache_key(session_path)?;
    if let Some(cached) = read_cache(cache_dir, &key) {
        debug!("Session cache hit: {}", key);
        return Ok(cached);
    }
    let data = FileSessionProvider::read_session_file(session_path)?;
    if let Err(err) = write_cache(cache_dir, &key, &data) {
        debug!("Session cache write skipped: {}", err);
    }
    Ok(data)
}

fn write_summary_stdout(figure: &RenderedFigure) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_summary_rows(figure, &mut writer)
}

fn write_summary_csv(figure: &RenderedFigure, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_summary_rows(figure, &mut writer)
}

fn write_summary_rows<W: Write>(figure: &RenderedFigure, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "driver",
        "team",
        "laps",
        "q1_s",
        "median_s",
        "q3_s",
        "mean_s",
        "trend_start_s",
        "trend_end_s",
        "linestyle",
        "color",
        "status",
    ])?;

    let fmt = |v: Option<f64>| v.map(|v| format!("{:.3}", v)).unwrap_or_default();

    for slot in &figure.distribution {
        let stats = slot.stats.as_ref();
        let trend = figure.trend_for(&slot.driver);
        let status = figure
            .skipped
            .iter()
            .find(|s| s.driver == slot.driver)
            .map(|s| format!("{:?}", s.reason))
            .unwrap_or_else(|| "ok".to_string());

        writer.write_record([
            slot.driver.clone(),
            slot.team.clone().unwrap_or_default(),
            stats.map(|s| s.count).unwrap_or(0).to_string(),
            fmt(stats.map(|s| s.q1)),
            fmt(stats.map(|s| s.median)),
            fmt(stats.map(|s| s.q3)),
            fmt(stats.map(|s| s.mean)),
            fmt(trend.and_then(|t| t.points.first().map(|(_, v)| *v))),
            fmt(trend.and_then(|t| t.points.last().map(|(_, v)| *v))),
            trend
                .map(|t| t.style.linestyle.as_str().to_string())
                .unwrap_or_default(),
            trend.map(|t| t.style.color.to_hex()).unwrap_or_default(),
            status,
        ])?;
    }

    writer.flush()?;
    Ok(())
}
