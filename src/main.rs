mod aggregator;
mod chart;
mod client;
mod config;
mod error;
mod export;
mod forecast;
mod heatmap;
mod insights;
mod models;
mod normalize;
mod service;
mod storage;
mod table;
mod ui;

use chart::{report_groups, ReportDimension};
use clap::{Parser, Subcommand};
use config::{
    db_path, delete_access_token, ensure_initialized, load_config, load_file_config, log_path,
    save_config, set_access_token, ThemeMode,
};
use error::AppError;
use client::BillingSource;
use export::{
    budget_table, csv_data_uri, detail_table, overview_table, report_table, to_csv, to_json,
    to_printable, ExportFormat, ExportSelection, ExportTable,
};
use insights::budget_status;
use models::{Month, Period, Platform, Quarter};
use service::{load_snapshot, refresh, BillingService, LoadedBilling};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use storage::Storage;
use table::{derive_table, ProjectFilter, SortConfig, SortKey};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ui::run::run_tui;

#[derive(Debug, Parser)]
#[command(name = "billing-lens")]
#[command(about = "Multi-tenant cloud billing overview, reports and exports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    Configure {
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        theme: Option<String>,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long, conflicts_with = "token")]
        clear_token: bool,
    },
    Refresh {
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
    Overview {
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long = "project")]
        projects: Vec<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        environment: Option<String>,
    },
    Export {
        #[arg(long, default_value = "overview")]
        kind: String,
        #[arg(long, default_value = "csv")]
        format: String,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<String>,
        #[arg(long)]
        quarter: Option<String>,
        #[arg(long, default_value = "team")]
        group_by: String,
        #[arg(long = "project")]
        projects: Vec<String>,
        #[arg(long = "code")]
        codes: Vec<String>,
        #[arg(long)]
        data_uri: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Budget {
        #[arg(long, default_value = "print")]
        format: String,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<String>,
        #[arg(long)]
        quarter: Option<String>,
        #[arg(long = "project")]
        projects: Vec<String>,
        #[arg(long = "code")]
        codes: Vec<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Tui,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportKind {
    Overview,
    Detail,
    Report,
}

fn validate_kind(input: &str) -> Result<ExportKind, AppError> {
    match input.trim().to_ascii_lowercase().as_str() {
        "overview" => Ok(ExportKind::Overview),
        "detail" => Ok(ExportKind::Detail),
        "report" => Ok(ExportKind::Report),
        _ => Err(AppError::Config(
            "Unsupported export kind. Use overview, detail, or report.".into(),
        )),
    }
}

fn validate_format(input: &str) -> Result<ExportFormat, AppError> {
    ExportFormat::parse(input).ok_or_else(|| {
        AppError::Config("Unsupported export format. Use csv, print, or json.".into())
    })
}

fn validate_platform(input: Option<&str>, fallback: Platform) -> Result<Platform, AppError> {
    match input {
        None => Ok(fallback),
        Some(raw) => Platform::parse(raw)
            .ok_or_else(|| AppError::Config(format!("Unsupported platform '{raw}'. Use GCP or AWS."))),
    }
}

fn resolve_period(month: Option<&str>, quarter: Option<&str>) -> Result<Period, AppError> {
    match (month, quarter) {
        (Some(_), Some(_)) => Err(AppError::Config(
            "Choose either --month or --quarter, not both.".into(),
        )),
        (Some(raw), None) => Month::from_token(&raw.trim().to_ascii_lowercase())
            .map(Period::Month)
            .ok_or_else(|| AppError::Config(format!("Unknown month '{raw}'. Use jan..dec."))),
        (None, Some(raw)) => Quarter::parse(raw)
            .map(Period::Quarter)
            .ok_or_else(|| AppError::Config(format!("Unknown quarter '{raw}'. Use Q1..Q4."))),
        (None, None) => Ok(Period::All),
    }
}

fn resolve_sort(sort: Option<&str>, desc: bool) -> Result<SortConfig, AppError> {
    let Some(raw) = sort else {
        return Ok(SortConfig::default());
    };
    let key = SortKey::parse(raw).ok_or_else(|| {
        AppError::Config(format!(
            "Unknown sort column '{raw}'. Use project, total, or a month token."
        ))
    })?;
    let config = SortConfig::default().request(key);
    Ok(if desc && config.direction != table::SortDirection::Descending {
        config.request(key)
    } else {
        config
    })
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("billing_lens=warn"));
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

fn open_snapshot(platform: Platform, year: i32) -> Result<LoadedBilling, AppError> {
    let storage = Storage::open(&db_path()?)?;
    let Some(info) = storage.snapshot_info(platform)? else {
        return Err(AppError::Config(format!(
            "No {platform} billing snapshot yet. Run `billing-lens refresh` first."
        )));
    };
    tracing::info!(
        platform = %info.platform,
        data_version = info.data_version,
        fetched_at = %info.fetched_at,
        "reading stored snapshot"
    );
    load_snapshot(&storage, platform, year)
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn build_export(
    kind: ExportKind,
    loaded: &LoadedBilling,
    selection: &ExportSelection,
    period: Period,
    dimension: ReportDimension,
    year: i32,
) -> ExportTable {
    let derived = derive_table(&loaded.billing.current, SortConfig::default());
    match kind {
        ExportKind::Overview => overview_table(&derived, selection, year),
        ExportKind::Detail => {
            let ordered: Vec<_> = derived.rows.iter().map(|r| r.project).collect();
            detail_table(&ordered, &loaded.meta, selection, period, year)
        }
        ExportKind::Report => {
            let chosen: Vec<_> = loaded
                .billing
                .current
                .iter()
                .filter(|p| selection.matches(p))
                .collect();
            let groups = report_groups(&chosen, &loaded.meta, dimension, period);
            report_table(&groups, dimension, period, year)
        }
    }
}

fn write_export(
    table: &ExportTable,
    format: ExportFormat,
    data_uri: bool,
    output: Option<PathBuf>,
) -> Result<(), AppError> {
    let mut payload = match format {
        ExportFormat::Csv => to_csv(table),
        ExportFormat::Print => to_printable(table, &today()),
        ExportFormat::Json => to_json(table)?,
    };
    if data_uri {
        payload = csv_data_uri(&payload);
    }

    match output {
        Some(path) => {
            let target = if path.is_dir() {
                path.join(table.file_name(format))
            } else {
                path
            };
            fs::write(&target, payload)?;
            tracing::info!(rows = table.body.len(), path = %target.display(), "export written");
            println!("Wrote {}", target.display());
        }
        None => println!("{payload}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Tui) {
        ensure_initialized()?;
        init_tracing(Some(&log_path()?))?;
    } else {
        init_tracing(None)?;
    }

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized billing-lens config and data directories.");
        }
        Commands::Configure {
            base_url,
            platform,
            year,
            theme,
            top_n,
            token,
            clear_token,
        } => {
            ensure_initialized()?;
            let mut cfg = load_file_config()?;

            if let Some(url) = base_url {
                url::Url::parse(url.trim())?;
                cfg.api_base_url = url;
            }
            cfg.platform = validate_platform(platform.as_deref(), cfg.platform)?;
            if let Some(year) = year {
                cfg.year = Some(year);
            }
            if let Some(raw) = theme {
                cfg.theme = ThemeMode::parse(&raw).ok_or_else(|| {
                    AppError::Config("Unsupported theme. Use system, light, or dark.".into())
                })?;
            }
            if let Some(n) = top_n {
                cfg.top_n = n;
            }
            if let Some(token) = token {
                set_access_token(token.trim())?;
            }
            if clear_token {
                delete_access_token()?;
            }

            save_config(&cfg)?;
            println!("Configuration saved.");
        }
        Commands::Refresh { platform, year } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let platform = validate_platform(platform.as_deref(), cfg.platform)?;
            let year = year.unwrap_or_else(|| cfg.effective_year());

            let mut storage = Storage::open(&db_path()?)?;
            let svc = BillingService::new()?;
            let source = svc.source(&cfg)?;
            let report = refresh(&source, platform, year, &mut storage).await?;
            println!(
                "Fetched {} {} line items for {} projects in {} ms (data version {}, {})",
                report.line_items,
                report.platform,
                report.projects,
                report.duration_ms,
                report.data_version,
                report.fetched_at.to_rfc3339()
            );
        }
        Commands::Overview {
            platform,
            year,
            sort,
            desc,
            projects,
            search,
            environment,
        } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let platform = validate_platform(platform.as_deref(), cfg.platform)?;
            let year = year.unwrap_or_else(|| cfg.effective_year());
            let sort = resolve_sort(sort.as_deref(), desc)?;

            let loaded = open_snapshot(platform, year)?;
            let filter = ProjectFilter {
                projects: projects.into_iter().collect(),
                search: search.unwrap_or_default(),
                environment,
            };
            let visible = filter.apply(&loaded.billing.current, &loaded.meta);
            let derived = derive_table(visible, sort);
            let table = overview_table(&derived, &ExportSelection::default(), year);
            println!("{}", to_printable(&table, &today()));
        }
        Commands::Export {
            kind,
            format,
            platform,
            year,
            month,
            quarter,
            group_by,
            projects,
            codes,
            data_uri,
            output,
        } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let kind = validate_kind(&kind)?;
            let format = validate_format(&format)?;
            let platform = validate_platform(platform.as_deref(), cfg.platform)?;
            let year = year.unwrap_or_else(|| cfg.effective_year());
            let period = resolve_period(month.as_deref(), quarter.as_deref())?;
            let dimension = ReportDimension::parse(&group_by).ok_or_else(|| {
                AppError::Config("Unsupported grouping. Use team or owner.".into())
            })?;
            if data_uri && format != ExportFormat::Csv {
                return Err(AppError::Config("--data-uri only applies to csv exports.".into()));
            }

            let loaded = open_snapshot(platform, year)?;
            let selection = ExportSelection {
                project_names: projects.into_iter().collect(),
                project_codes: codes.into_iter().collect(),
            };
            let table = build_export(kind, &loaded, &selection, period, dimension, year);
            write_export(&table, format, data_uri, output)?;
        }
        Commands::Budget {
            format,
            platform,
            year,
            month,
            quarter,
            projects,
            codes,
            output,
        } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let format = validate_format(&format)?;
            let platform = validate_platform(platform.as_deref(), cfg.platform)?;
            let year = year.unwrap_or_else(|| cfg.effective_year());
            let period = resolve_period(month.as_deref(), quarter.as_deref())?;

            let loaded = open_snapshot(platform, year)?;
            let svc = BillingService::new()?;
            let budgets = svc.source(&cfg)?.fetch_budgets(year).await?;
            tracing::info!(year, lines = budgets.len(), "budgets fetched");

            let selection = ExportSelection {
                project_names: projects.into_iter().collect(),
                project_codes: codes.into_iter().collect(),
            };
            let derived = derive_table(&loaded.billing.current, SortConfig::default());
            let chosen: Vec<_> = derived
                .rows
                .iter()
                .map(|r| r.project)
                .filter(|p| selection.matches(p))
                .collect();
            let rows = budget_status(&chosen, &budgets);
            write_export(&budget_table(&rows, period, year), format, false, output)?;
        }
        Commands::Tui => {
            let cfg = load_config()?;
            run_tui(cfg).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use table::SortDirection;

    #[test]
    fn validate_kind_accepts_known_values() {
        assert_eq!(validate_kind("overview").expect("kind"), ExportKind::Overview);
        assert_eq!(validate_kind(" Detail ").expect("kind"), ExportKind::Detail);
        assert_eq!(validate_kind("report").expect("kind"), ExportKind::Report);
    }

    #[test]
    fn validate_kind_rejects_unknown_values() {
        let err = validate_kind("summary").expect_err("expected validation error");
        assert!(err.to_string().contains("Unsupported export kind"));
    }

    #[test]
    fn validate_format_maps_pdf_to_print() {
        assert_eq!(validate_format("pdf").expect("format"), ExportFormat::Print);
        assert!(validate_format("xlsx").is_err());
    }

    #[test]
    fn resolve_period_rejects_month_and_quarter_together() {
        assert!(resolve_period(Some("jan"), Some("Q1")).is_err());
        assert_eq!(resolve_period(Some("MAR"), None).expect("period"), Period::Month(Month::Mar));
        assert_eq!(resolve_period(None, Some("q3")).expect("period"), Period::Quarter(Quarter::Q3));
        assert_eq!(resolve_period(None, None).expect("period"), Period::All);
        assert!(resolve_period(Some("march"), None).is_err());
    }

    #[test]
    fn resolve_sort_defaults_to_total_descending() {
        assert_eq!(resolve_sort(None, false).expect("sort"), SortConfig::default());

        let asc = resolve_sort(Some("project"), false).expect("sort");
        assert_eq!(asc.key, SortKey::ProjectName);
        assert_eq!(asc.direction, SortDirection::Ascending);

        let desc = resolve_sort(Some("feb"), true).expect("sort");
        assert_eq!(desc.key, SortKey::Month(Month::Feb));
        assert_eq!(desc.direction, SortDirection::Descending);
    }

    #[test]
    fn validate_platform_falls_back_to_config() {
        assert_eq!(validate_platform(None, Platform::Aws).expect("platform"), Platform::Aws);
        assert_eq!(validate_platform(Some("gcp"), Platform::Aws).expect("platform"), Platform::Gcp);
        assert!(validate_platform(Some("azure"), Platform::Gcp).is_err());
    }
}
