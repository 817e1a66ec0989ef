use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use tokio::sync::broadcast;
use uuid::Uuid;

use mediagrab::converter::ConvertPreset;
use mediagrab::db::{ensure_app_dirs, AppDirs};
use mediagrab::events::Level;
use mediagrab::scheduler::parse_time_of_day;
use mediagrab::tool_manager::{ToolManager, ToolManagerConfig};
use mediagrab::{App, AppEvent, DownloadForm, EventReceiver, QualitySelector, Repeat};

#[derive(Parser, Debug)]
#[command(name = "mediagrab")]
#[command(author, version, about = "Download and convert media with yt-dlp and ffmpeg", long_about = None)]
struct Cli {
    /// State directory (config, history, schedule, logs)
    #[arg(long, global = true, env = "MEDIAGRAB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory searched first for yt-dlp and ffmpeg
    #[arg(long, global = true)]
    tools_dir: Option<PathBuf>,

    /// Log at debug level; stderr shows every log line instead of only warnings and errors
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print events as JSON lines instead of plain text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download one URL
    Download {
        url: String,
        #[command(flatten)]
        opts: RequestArgs,
    },
    /// Print metadata for a URL without downloading
    Info { url: String },
    /// Queue URLs and process them one after another
    Queue {
        /// URLs to queue
        urls: Vec<String>,
        /// Newline-separated URL list file
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
        /// Free-form text to pull URLs out of
        #[arg(long)]
        text: Option<String>,
        #[command(flatten)]
        opts: RequestArgs,
    },
    /// Download history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Read and change the config document
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Time-of-day download schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Re-encode a local file with ffmpeg
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// "copy" or a target height such as "720p"
        #[arg(short, long, default_value = "copy")]
        preset: ConvertPreset,
    },
    /// Upgrade yt-dlp through pip
    Update,
    /// Print the yt-dlp version in use
    Version,
}

#[derive(Args, Debug, Clone)]
struct RequestArgs {
    /// best, audio, or a maximum height such as 1080 / 720p
    #[arg(short, long)]
    quality: Option<QualitySelector>,

    /// Named preset from the config document
    #[arg(long)]
    preset: Option<String>,

    /// Download subtitles
    #[arg(long)]
    subs: bool,

    /// Subtitle language code
    #[arg(long)]
    sub_lang: Option<String>,

    /// Rate limit in KB/s (0 = unlimited)
    #[arg(long)]
    rate: Option<u32>,

    /// Netscape cookie file
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Output directory (remembered for next time)
    #[arg(short, long)]
    dest: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// Newest first
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: u32,
    },
    Clear,
    /// Write the history as tab-separated text
    Export { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print one key, or the whole document
    Get { key: Option<String> },
    /// Set a key; the value is parsed as JSON, falling back to a string
    Set { key: String, value: String },
    /// List named presets
    Presets,
}

#[derive(Subcommand, Debug)]
enum ScheduleAction {
    Add {
        url: String,
        /// Local time of day, HH:MM
        #[arg(long)]
        at: String,
        /// once, daily or weekly
        #[arg(long, default_value = "once")]
        repeat: Repeat,
        #[command(flatten)]
        opts: RequestArgs,
    },
    List,
    Remove { id: Uuid },
    /// Keep running and fire entries as they come due (Ctrl-C stops)
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = match &cli.data_dir {
        Some(dir) => AppDirs::at(dir)?,
        None => ensure_app_dirs()?,
    };
    setup_logging(&dirs, cli.verbose);

    let tools = ToolManager::new(ToolManagerConfig {
        bundled_dir: cli.tools_dir.clone(),
        ..Default::default()
    });
    let (mut app, rx) = App::open_with_ytdlp(dirs, tools)?;
    let printer = tokio::spawn(print_events(rx, cli.json));

    let result = run(&mut app, cli.command).await;

    // Dropping the app closes the event channel so the printer can finish.
    drop(app);
    let _ = printer.await;
    result
}

async fn run(app: &mut App, command: Command) -> Result<()> {
    match command {
        Command::Download { url, opts } => {
            let form = build_form(app, url, &opts)?;
            app.download(&form.to_request()).await?;
        }
        Command::Info { url } => {
            let info = app.fetch_info(&url).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Queue {
            urls,
            file,
            text,
            opts,
        } => {
            let template = build_form(app, String::new(), &opts)?.to_request();
            for url in urls {
                let mut request = template.clone();
                request.url = url;
                app.enqueue(request)?;
            }
            if let Some(text) = text {
                app.enqueue_text(&text, &template);
            }
            if let Some(path) = file {
                app.import_file(&path, &template)?;
            }

            let summary = app.drain_queue().await?;
            println!(
                "{} downloaded, {} failed",
                summary.succeeded, summary.failed
            );
            if summary.failed > 0 {
                bail!("{} of {} downloads failed", summary.failed, summary.total());
            }
        }
        Command::History { action } => history(app, action)?,
        Command::Config { action } => config(app, action)?,
        Command::Schedule { action } => schedule(app, action).await?,
        Command::Convert {
            input,
            output,
            preset,
        } => {
            let path = app.convert(&input, &output, preset).await?;
            println!("{}", path.display());
        }
        Command::Update => {
            let report = app.upgrade_extractor().await?;
            if report.changed() {
                println!(
                    "yt-dlp {} -> {}",
                    report.previous.as_deref().unwrap_or("?"),
                    report.current.as_deref().unwrap_or("?")
                );
            } else {
                println!("yt-dlp is up to date");
            }
        }
        Command::Version => {
            println!("{}", app.extractor_version().await?);
        }
    }
    Ok(())
}

/// Start from the config-backed form and apply command line overrides.
fn build_form(app: &mut App, url: String, opts: &RequestArgs) -> Result<DownloadForm> {
    if let Some(dest) = &opts.dest {
        app.save_last_path(dest);
    }

    let mut form = app.form();
    form.url = url;

    if let Some(name) = &opts.preset {
        if !form.apply_preset(app.config(), name) {
            bail!("unknown preset: {name}");
        }
    }
    if let Some(quality) = opts.quality {
        form.quality = quality;
    }
    if opts.subs {
        form.download_subtitles = true;
    }
    if let Some(lang) = &opts.sub_lang {
        form.subtitle_language = lang.clone();
    }
    if let Some(rate) = opts.rate {
        form.speed_limit_kbps = rate;
    }
    if let Some(cookies) = &opts.cookies {
        form.use_cookies = true;
        form.cookies_file = Some(cookies.clone());
    }
    Ok(form)
}

fn history(app: &App, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { limit } => {
            for record in app.history(limit)? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    record.downloaded_at.format("%Y-%m-%d %H:%M"),
                    record.quality,
                    record.title,
                    record.url,
                    record.filename
                );
            }
        }
        HistoryAction::Clear => {
            let n = app.clear_history()?;
            println!("removed {n} entries");
        }
        HistoryAction::Export { path } => {
            let n = app.export_history(&path)?;
            println!("exported {n} entries to {}", path.display());
        }
    }
    Ok(())
}

fn config(app: &mut App, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key: Some(key) } => match app.config().get(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => bail!("no such key: {key}"),
        },
        ConfigAction::Get { key: None } => {
            println!("{}", serde_json::to_string_pretty(app.config().document())?);
        }
        ConfigAction::Set { key, value } => {
            let value = serde_json::from_str::<serde_json::Value>(&value)
                .unwrap_or(serde_json::Value::String(value));
            app.config_mut().set(&key, value);
        }
        ConfigAction::Presets => {
            for (name, preset) in app.config().presets() {
                let subs = if preset.subtitles { ", subtitles" } else { "" };
                println!("{name}: {}{subs}", preset.quality);
            }
        }
    }
    Ok(())
}

async fn schedule(app: &mut App, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::Add {
            url,
            at,
            repeat,
            opts,
        } => {
            let at = parse_time_of_day(&at)?;
            let request = build_form(app, url, &opts)?.to_request();
            let entry = app.schedule_add(request, at, repeat)?;
            println!("{}", entry.id);
        }
        ScheduleAction::List => {
            for entry in app.schedule_list() {
                let weekday = entry
                    .weekday
                    .map(|d| format!(" {d}"))
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}{}\t{}",
                    entry.id,
                    entry.at.format("%H:%M"),
                    entry.repeat,
                    weekday,
                    entry.request.url
                );
            }
        }
        ScheduleAction::Remove { id } => {
            if !app.schedule_remove(id)? {
                bail!("no scheduled entry with id {id}");
            }
        }
        ScheduleAction::Run => {
            if app.auto_update_enabled() {
                if let Err(e) = app.upgrade_extractor().await {
                    log::warn!("Startup yt-dlp update skipped: {}", e);
                }
            }

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            let handle = app.run_scheduler(shutdown_rx);
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            let _ = shutdown_tx.send(());
            handle.await.context("scheduler task failed")?;
        }
    }
    Ok(())
}

async fn print_events(mut rx: EventReceiver, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("Failed to serialize event: {}", e),
            }
            continue;
        }

        // Progress lines already arrive throttled as `Log` events. Warnings
        // and errors reach stderr through the logger.
        match event {
            AppEvent::Log {
                level: Level::Info,
                message,
            } => println!("{message}"),
            AppEvent::DownloadCompleted {
                record: Some(record),
                ..
            } => println!("Saved {}", record.filename),
            _ => {}
        }
    }
}

fn setup_logging(dirs: &AppDirs, verbose: bool) {
    let filter = std::env::var("MEDIAGRAB_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });

    let mut dispatch = fern::Dispatch::new()
        .level(filter)
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{:<5}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        });

    match fern::log_file(dirs.log_file()) {
        Ok(file) => dispatch = dispatch.chain(file),
        Err(e) => eprintln!(
            "warning: cannot open log file {}: {}",
            dirs.log_file().display(),
            e
        ),
    }
    dispatch = dispatch.chain(
        fern::Dispatch::new()
            .level(stderr_level(filter, verbose))
            .chain(std::io::stderr()),
    );

    if let Err(e) = dispatch.apply() {
        eprintln!("warning: logging setup failed: {e}");
    }
}

/// stderr always gets log lines; plain runs only see warnings and errors
/// there since info-level status already goes to stdout.
fn stderr_level(filter: LevelFilter, verbose: bool) -> LevelFilter {
    if verbose {
        filter
    } else {
        filter.min(LevelFilter::Warn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_carries_warnings_by_default_and_everything_when_verbose() {
        assert_eq!(stderr_level(LevelFilter::Info, false), LevelFilter::Warn);
        assert_eq!(stderr_level(LevelFilter::Error, false), LevelFilter::Error);
        assert_eq!(stderr_level(LevelFilter::Debug, true), LevelFilter::Debug);
    }

    #[test]
    fn request_flags_parse() {
        let cli = Cli::try_parse_from([
            "mediagrab", "download", "https://example.com/v", "-q", "720p", "--rate", "50",
        ])
        .unwrap();
        match cli.command {
            Command::Download { url, opts } => {
                assert_eq!(url, "https://example.com/v");
                assert_eq!(opts.quality, Some(QualitySelector::MaxHeight(720)));
                assert_eq!(opts.rate, Some(50));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
