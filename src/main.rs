/// hydroview command-line entry point
///
/// Usage: hydroview <NWS_ID> [--bypass] [--ensemble] [-c|--config <path>]
///
/// Loads one gauge from the NOAA APIs and prints its summary, flood
/// thresholds, NWM forecast peaks and, with `--ensemble`, the HEFS
/// two-window flood risk table.

use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::process;

use hydroview::config::Config;
use hydroview::ingest::NoaaClient;
use hydroview::logging::{self, Component};
use hydroview::session::SessionCache;
use hydroview::view::{GaugeView, ViewOptions, load_gauge_view};

/// NOAA gauge viewer with HEFS flood risk.
#[derive(Debug, PartialEq, Parser)]
#[command(name = "hydroview", version, about = "NOAA gauge viewer with HEFS flood risk")]
struct Args {
    /// NWS location id, e.g. PIAI2 (case-insensitive).
    #[arg(value_parser = parse_gauge_id)]
    gauge_id: String,

    /// Drop cached data for this gauge and refetch.
    #[arg(long)]
    bypass: bool,

    /// Also fetch the latest HEFS ensemble and compute flood risk.
    #[arg(long)]
    ensemble: bool,

    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_gauge_id(raw: &str) -> Result<String, String> {
    let id = raw.trim().to_ascii_uppercase();
    if id.is_empty() {
        return Err("gauge id must not be empty".to_string());
    }
    Ok(id)
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "Not available".to_string())
}

fn print_view(view: &GaugeView) {
    let meta = &view.metadata;
    println!("═══════════════════════════════════════════════════════════");
    println!("{} ({})", if meta.name.is_empty() { "Unnamed gauge" } else { meta.name.as_str() }, view.gauge_id);
    println!("═══════════════════════════════════════════════════════════");
    if let (Some(lat), Some(lon)) = (meta.latitude, meta.longitude) {
        println!("Location:            {:.4}, {:.4}", lat, lon);
    }
    if let Some(usgs) = &meta.usgs_id {
        println!("USGS site:           {}", usgs);
    }
    if let Some(reach) = &meta.reach_id {
        println!("NWM reach:           {}", reach);
    }
    println!("Latest observation:  {}", fmt_time(view.latest_observation));
    if let Some(stage) = view.latest_stage {
        println!("Latest stage:        {:.2} ft", stage);
    }
    println!("Forecast issued:     {}", fmt_time(view.forecast.issued));
    if let Some(alert) = &view.current_alert {
        println!("⚠ {}", alert.message);
    }

    if !view.has_any_data() {
        println!("\nNo data available for this location.");
        return;
    }

    let thresholds = view.thresholds().sorted();
    if !thresholds.is_empty() {
        println!("\nFlood stages:");
        for threshold in &thresholds {
            println!("  {:<10} {:>7.2} ft", threshold.name, threshold.stage);
        }
    }

    if !view.peaks.is_empty() {
        println!("\nNWM forecast peaks:");
        for peak in &view.peaks {
            let flow = peak
                .flow
                .map(|f| format!("{:.0} cfs", f))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<26} {:>7.2} ft  {:>10}  at {}  (run {})",
                peak.model.label(),
                peak.stage,
                flow,
                fmt_time(Some(peak.peak_time)),
                fmt_time(peak.reference_time)
            );
        }
    }

    if let Some(ensemble) = &view.ensemble {
        println!("\nHEFS ensemble:");
        println!("  Run time:  {}", fmt_time(ensemble.fetch.run_time));
        if let Some(span) = ensemble.fetch.span {
            println!("  Members:   {} (forcing years {}-{})", span.count, span.first, span.last);
        }
        match &ensemble.risk {
            Some(risk) if !risk.is_empty() => {
                println!(
                    "\n  {:<10} {:>8}  {:>12}  {:>12}  {}",
                    "Category", "Stage", "Short-term", "Long-term", "Risk"
                );
                for row in &risk.rows {
                    println!(
                        "  {:<10} {:>6.2} ft  {:>11.1}%  {:>11.1}%  {}",
                        row.name, row.stage, row.short_term, row.long_term, row.level
                    );
                }
                println!(
                    "\n  Short-term: {} to {}",
                    fmt_time(Some(risk.short_window.0)),
                    fmt_time(Some(risk.short_window.1))
                );
                println!(
                    "  Long-term:  {} to {}",
                    fmt_time(Some(risk.long_window.0)),
                    fmt_time(Some(risk.long_window.1))
                );
            }
            _ => println!("  No flood risk table (no thresholds or no ensemble data)."),
        }
    }

    for diagnostic in &view.diagnostics {
        println!("note: {}", diagnostic);
    }
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };
    logging::init_logger(
        config.logging.level,
        config.logging.log_file.as_deref(),
        config.logging.console_timestamps,
    );

    let client = match NoaaClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            logging::error(Component::System, None, &format!("could not build HTTP client: {}", e));
            process::exit(1);
        }
    };

    let mut cache = SessionCache::from_config(&config.cache);
    let options = ViewOptions::from_config(&config, args.bypass, args.ensemble);
    match load_gauge_view(&client, &mut cache, &args.gauge_id, &options, Utc::now()) {
        Ok(view) => print_view(&view),
        Err(e) => {
            eprintln!("Error loading {}: {}", args.gauge_id, e);
            process::exit(1);
        }
    }
}
