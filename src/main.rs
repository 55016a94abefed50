use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use sire_report::{
    load_config, render_terminal, ConfigError, ExportError, ExportFormat, ExportRequest, ReportConfig, ReportSession,
    SessionStatus, Severity,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "report.yaml";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Markdown,
    Html,
    All,
}

impl FormatArg {
    fn formats(self) -> Vec<ExportFormat> {
        match self {
            FormatArg::Markdown => vec![ExportFormat::Markdown],
            FormatArg::Html => vec![ExportFormat::Html],
            FormatArg::All => vec![ExportFormat::Markdown, ExportFormat::Html],
        }
    }
}

/// Review a SIRE 2.0 inspection export and write it out as a report.
#[derive(Debug, Parser)]
#[command(name = "sire-report", version)]
struct Cli {
    /// Inspection export (.json) to load
    input: Option<PathBuf>,

    /// YAML config; `report.yaml` is used when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory (overrides output.dir)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Output file stem (overrides output.file_stem)
    #[arg(long)]
    stem: Option<String>,

    /// Document title (overrides title)
    #[arg(long)]
    title: Option<String>,

    /// Export format(s) (overrides output.formats)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Skip the on-screen tables
    #[arg(long)]
    no_display: bool,

    /// Skip writing the report files
    #[arg(long)]
    no_export: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn resolve_config(cli: &Cli) -> Result<ReportConfig, ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => load_config(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(Path::new(DEFAULT_CONFIG))?,
        None => ReportConfig::default(),
    };
    if let Some(out) = &cli.out {
        cfg.output.dir = out.display().to_string();
    }
    if let Some(stem) = &cli.stem {
        cfg.output.file_stem = stem.clone();
    }
    if let Some(title) = &cli.title {
        cfg.title = title.clone();
    }
    if let Some(format) = cli.format {
        cfg.output.formats = format.formats();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn exit_code(status: &SessionStatus) -> i32 {
    match status {
        SessionStatus::Loaded | SessionStatus::LoadedWithCleanup => 0,
        SessionStatus::MissingUpload => 1,
        SessionStatus::ParseFailed(_) => 4,
        SessionStatus::TraversalFailed(_) => 5,
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let cfg = match resolve_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(tool = "load_config", error = %e);
            std::process::exit(3);
        }
    };

    let upload = match &cli.input {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(tool = "read_upload", file = %path.display(), error = %e, "Error loading file");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut session = ReportSession::new();
    let status = session.process(upload.as_deref());
    match status.severity() {
        Severity::Success => info!(tool = "process", status = ?status, "{}", status.message()),
        Severity::Warning => warn!(tool = "process", "{}", status.message()),
        Severity::Error => error!(tool = "process", "{}", status.message()),
    }
    if status.severity() != Severity::Success {
        std::process::exit(exit_code(&status));
    }

    let Some(report) = session.report(&cfg.title) else {
        info!(tool = "process", "document is empty, nothing to show");
        return;
    };

    if !cli.no_display {
        println!("{}", render_terminal(&report, cfg.display.width));
    }

    if cli.no_export {
        return;
    }
    let request = ExportRequest { title: cfg.title.clone(), emit: cfg.emit_options() };
    match session.export(&request) {
        Ok(paths) => {
            for doc in &paths.documents {
                info!(tool = "emit_report", file = %doc.display(), "written");
            }
        }
        Err(ExportError::NothingLoaded) => {
            warn!(tool = "emit_report", "{}", ExportError::NothingLoaded);
            std::process::exit(1);
        }
        Err(e) => {
            error!(tool = "emit_report", error = %e);
            std::process::exit(6);
        }
    }
}
