use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use challenge_curve::{
    build_challenge_data, build_chart_model, build_month_series, load_challenge_data,
    AthleteExport, ChallengeData, DistanceUnit, MonthWindow, Params,
};
use chrono::{Datelike, Local, NaiveDate};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Monthly challenge cumulative distance CLI", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write cumulative distance series as CSV
    Series(SeriesArgs),
    /// Write the chart data (datasets, axis bounds, marker anchors) as JSON
    Chart(ChartArgs),
    /// Build athletes.json from per-athlete activity exports
    Aggregate(AggregateArgs),
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// Challenge data file (athletes.json)
    #[arg(value_hint = ValueHint::FilePath)]
    data: PathBuf,

    /// Zero-based month index (defaults to the current month)
    #[arg(long, allow_negative_numbers = true)]
    month: Option<i64>,

    /// Distance unit for cumulative values
    #[arg(long, value_enum, default_value_t = UnitOpt::Mi)]
    unit: UnitOpt,

    /// Restrict to one activity type (e.g. "Run", "Trail Run")
    #[arg(long)]
    activity_type: Option<String>,

    /// Decimal places kept on cumulative values
    #[arg(long, default_value_t = 2)]
    decimals: u32,
}

#[derive(Parser, Debug)]
struct SeriesArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct ChartArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Output JSON path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct AggregateArgs {
    /// Activity export files; the file stem names the athlete unless the export does
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Reference date (YYYY-MM-DD) selecting the current month
    #[arg(long, value_parser = parse_as_of)]
    as_of: Option<NaiveDate>,

    /// Output path for the challenge data
    #[arg(short, long, default_value = "data/athletes.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum UnitOpt {
    Mi,
    Km,
}

impl From<UnitOpt> for DistanceUnit {
    fn from(value: UnitOpt) -> Self {
        match value {
            UnitOpt::Mi => DistanceUnit::Miles,
            UnitOpt::Km => DistanceUnit::Kilometers,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Series(args) => handle_series(args),
        Command::Chart(args) => handle_chart(args),
        Command::Aggregate(args) => handle_aggregate(args),
    }
}

fn parse_as_of(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD", input))
}

fn build_params(selection: &SelectionArgs) -> Result<Params> {
    let mut params = Params::for_unit(selection.unit.into());
    params.activity_type = selection.activity_type.clone();
    params.decimals = selection.decimals;
    params.validate()?;
    Ok(params)
}

fn selected_month(selection: &SelectionArgs) -> i64 {
    selection
        .month
        .unwrap_or_else(|| Local::now().date_naive().month0() as i64)
}

fn load_selection(selection: &SelectionArgs) -> Result<(ChallengeData, i64, Params)> {
    let data = load_challenge_data(&selection.data)
        .with_context(|| format!("failed to load {}", selection.data.display()))?;
    let month = selected_month(selection);
    if challenge_curve::checked_month(month).is_none() {
        warn!("Month index {} is outside 0-11; series will be empty", month);
    }
    debug!(
        "Loaded {} athletes from {}",
        data.athletes.len(),
        selection.data.display()
    );
    Ok((data, month, build_params(selection)?))
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::stdout().lock()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(Box::new(file))
}

fn handle_series(args: SeriesArgs) -> Result<()> {
    let (data, month, params) = load_selection(&args.selection)?;
    let mut writer = csv::Writer::from_writer(open_output(&args.output)?);
    let rows = write_series_rows(&data, month, &params, &mut writer)?;
    if args.output.as_os_str() != "-" {
        info!("Wrote {} series rows: {}", rows, args.output.display());
    }
    Ok(())
}

fn write_series_rows<W: Write>(
    data: &ChallengeData,
    month: i64,
    params: &Params,
    writer: &mut csv::Writer<W>,
) -> Result<usize> {
    let value_column = format!("cumulative_{}", params.unit.label());
    writer.write_record(["athlete", "display_name", "day", value_column.as_str()])?;

    let mut rows = 0;
    for (alias, series) in build_month_series(data, month, params) {
        let label = data.athletes[&alias].resolved_display_name(&alias);
        if series.is_empty() {
            debug!("No data for {} in month {}", alias, month);
        }
        for (idx, value) in series.iter().enumerate() {
            writer.write_record([
                alias.as_str(),
                label.as_str(),
                (idx + 1).to_string().as_str(),
                format!("{:.*}", params.decimals as usize, value).as_str(),
            ])?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}

fn handle_chart(args: ChartArgs) -> Result<()> {
    let (data, month, params) = load_selection(&args.selection)?;
    let model = build_chart_model(&data, month, &params);
    if model.is_empty() {
        warn!("No athlete has data for month {}", month);
    }
    let mut out = open_output(&args.output)?;
    serde_json::to_writer_pretty(&mut out, &model)?;
    writeln!(out)?;
    out.flush()?;
    if args.output.as_os_str() != "-" {
        info!(
            "Wrote chart data: {} ({} datasets, {} markers)",
            args.output.display(),
            model.datasets.len(),
            model.overlays.len()
        );
    }
    Ok(())
}

fn username_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("athlete")
        .to_string()
}

fn handle_aggregate(args: AggregateArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no export files supplied"));
    }
    let as_of = args.as_of.unwrap_or_else(|| Local::now().date_naive());
    let window = MonthWindow::ending_at(as_of);

    let t_parse = Instant::now();
    let exports = args
        .inputs
        .par_iter()
        .map(|path| -> Result<AthleteExport> {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            AthleteExport::from_json_str(&username_for(path), &text)
                .with_context(|| format!("failed to parse {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(
        "Parse stage: {:.1} ms ({} exports)",
        t_parse.elapsed().as_secs_f64() * 1000.0,
        exports.len()
    );

    for export in &exports {
        info!(
            "{}: {} activities fetched",
            export.username,
            export.activities.len()
        );
    }

    let data = build_challenge_data(&exports, &window);
    let mut out = open_output(&args.output)?;
    out.write_all(data.to_json_pretty()?.as_bytes())?;
    out.flush()?;
    info!(
        "Wrote challenge data for {} athletes ({}): {}",
        data.athletes.len(),
        data.month_names.join(", "),
        args.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_as_of() {
        assert_eq!(
            parse_as_of("2026-10-19").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
        );
        assert!(parse_as_of("19/10/2026").is_err());
    }

    #[test]
    fn test_username_from_file_stem() {
        assert_eq!(username_for(Path::new("exports/jdoe.json")), "jdoe");
    }

    #[test]
    fn test_series_csv_rows() {
        let data = ChallengeData::from_json_str(
            r#"{"athletes": {
                "amy": {"display_name": "Amy", "daily_distance_km": {"1": [5.0, 5.0, 0.0, 10.0]}},
                "bo": {"username": "bo"}
            }}"#,
        )
        .unwrap();
        let mut writer = csv::Writer::from_writer(Vec::new());
        let rows = write_series_rows(&data, 1, &Params::default(), &mut writer).unwrap();
        assert_eq!(rows, 4);
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "athlete,display_name,day,cumulative_mi",
                "amy,Amy,1,3.11",
                "amy,Amy,2,6.21",
                "amy,Amy,3,6.21",
                "amy,Amy,4,12.43",
            ]
        );
    }

    #[test]
    fn test_cli_parses_series_args() {
        let cli = Cli::try_parse_from([
            "challenge-curve",
            "series",
            "athletes.json",
            "--month",
            "9",
            "--unit",
            "km",
            "--activity-type",
            "Run",
        ])
        .unwrap();
        let Command::Series(args) = cli.command else {
            panic!("expected series command");
        };
        assert_eq!(args.selection.month, Some(9));
        let params = build_params(&args.selection).unwrap();
        assert_eq!(params.unit, DistanceUnit::Kilometers);
        assert_eq!(params.activity_type.as_deref(), Some("Run"));
        assert_eq!(params.decimals, 2);
    }

    #[test]
    fn test_excess_decimals_rejected() {
        let cli = Cli::try_parse_from([
            "challenge-curve",
            "chart",
            "athletes.json",
            "--decimals",
            "40",
        ])
        .unwrap();
        let Command::Chart(args) = cli.command else {
            panic!("expected chart command");
        };
        let err = build_params(&args.selection).unwrap_err();
        assert!(err.to_string().contains("decimals"));
    }
}
