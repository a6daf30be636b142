use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use kestrel_script_host::logging::init_tracing;
use kestrel_script_host::script_harness::{first_divergence, load_fixture, run_fixture, HarnessOutput};
use tracing::{error, info, warn};

const GOLDEN_SUFFIX: &str = ".golden.json";

fn main() {
    init_tracing();
    if let Err(err) = run_cli() {
        error!(error = ?err, "script_harness_failed");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let opts = parse_args()?;
    match &opts.mode {
        Mode::Single { fixture, golden, write_output } => {
            let output = run_one(fixture, opts.steps)?;
            if let Some(path) = write_output {
                write_json(path, &output)?;
            }
            match golden {
                Some(path) => check_golden(fixture, path, &output)?,
                None if write_output.is_none() => {
                    serde_json::to_writer_pretty(std::io::stdout(), &output)?;
                    println!();
                }
                None => {}
            }
        }
        Mode::Directory { dir, update } => {
            let fixtures = fixtures_in(dir)?;
            let mut failures = 0usize;
            for fixture in &fixtures {
                let golden = golden_path(fixture);
                let output = run_one(fixture, opts.steps)?;
                if *update {
                    write_json(&golden, &output)?;
                } else if golden.exists() {
                    if let Err(err) = check_golden(fixture, &golden, &output) {
                        warn!(fixture = %fixture.display(), error = %err, "harness_fixture_diverged");
                        failures += 1;
                    }
                } else {
                    warn!(fixture = %fixture.display(), "harness_golden_missing");
                }
            }
            info!(fixtures = fixtures.len(), failures, dir = %dir.display(), "harness_directory_complete");
            if failures > 0 {
                bail!("{failures} of {} fixture(s) diverged from their golden output", fixtures.len());
            }
        }
    }
    Ok(())
}

fn run_one(path: &Path, steps: Option<usize>) -> Result<HarnessOutput> {
    let mut fixture = load_fixture(path)?;
    if let Some(steps) = steps {
        fixture.steps = steps;
    }
    run_fixture(&fixture).with_context(|| format!("running fixture '{}'", path.display()))
}

fn check_golden(fixture: &Path, golden: &Path, output: &HarnessOutput) -> Result<()> {
    let file = File::open(golden).with_context(|| format!("opening golden file '{}'", golden.display()))?;
    let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
    if let Some(divergence) = first_divergence(&expected, output) {
        bail!("golden mismatch for {} (rerun with --write-output to refresh): {divergence}", fixture.display());
    }
    info!(fixture = %fixture.display(), golden = %golden.display(), "harness_golden_matched");
    Ok(())
}

fn write_json(path: &Path, output: &HarnessOutput) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("writing harness output to '{}'", path.display()))?;
    serde_json::to_writer_pretty(file, output).with_context(|| "serializing harness output")?;
    info!(path = %path.display(), "harness_output_written");
    Ok(())
}

/// Fixture files in `dir`, skipping golden outputs, in name order.
fn fixtures_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("reading fixture directory '{}'", dir.display()))?;
    let mut fixtures: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            let name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
            name.ends_with(".json") && !name.ends_with(GOLDEN_SUFFIX)
        })
        .collect();
    fixtures.sort();
    Ok(fixtures)
}

fn golden_path(fixture: &Path) -> PathBuf {
    let stem = fixture.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
    fixture.with_file_name(format!("{stem}{GOLDEN_SUFFIX}"))
}

enum Mode {
    Single { fixture: PathBuf, golden: Option<PathBuf>, write_output: Option<PathBuf> },
    Directory { dir: PathBuf, update: bool },
}

struct CliOptions {
    mode: Mode,
    steps: Option<usize>,
}

fn parse_args() -> Result<CliOptions> {
    let mut fixture = None;
    let mut dir = None;
    let mut golden = None;
    let mut write_output = None;
    let mut update = false;
    let mut steps = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || args.next().ok_or_else(|| anyhow!("expected a value after '{arg}'"));
        match arg.as_str() {
            "--fixture" | "-f" => fixture = Some(PathBuf::from(value()?)),
            "--dir" | "-d" => dir = Some(PathBuf::from(value()?)),
            "--golden" | "-g" => golden = Some(PathBuf::from(value()?)),
            "--write-output" | "-o" => write_output = Some(PathBuf::from(value()?)),
            "--steps" | "-s" => {
                let raw = value()?;
                steps = Some(raw.parse::<usize>().with_context(|| format!("invalid step count '{raw}'"))?);
            }
            "--update-golden" => update = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    let mode = match (fixture, dir) {
        (Some(fixture), None) => {
            if update {
                bail!("--update-golden only applies to --dir; use --write-output for a single fixture");
            }
            Mode::Single { fixture, golden, write_output }
        }
        (None, Some(dir)) => {
            if golden.is_some() || write_output.is_some() {
                bail!("--golden and --write-output only apply to a single --fixture");
            }
            Mode::Directory { dir, update }
        }
        (Some(_), Some(_)) => bail!("pass either --fixture or --dir, not both"),
        (None, None) => bail!("--fixture <path> or --dir <path> is required"),
    };
    Ok(CliOptions { mode, steps })
}

fn print_help() {
    println!("Usage: script_harness (--fixture <path> [--golden <path>] [--write-output <path>] | --dir <path> [--update-golden]) [--steps <n>]");
    println!("  -f, --fixture        Harness fixture JSON (behaviours, scene, steps, input)");
    println!("  -d, --dir            Run every fixture in a directory against its <name>.golden.json");
    println!("  -g, --golden         Golden output to compare a single run against");
    println!("  -o, --write-output   Write a single run's output JSON to this path");
    println!("      --update-golden  Rewrite the golden files of every fixture in --dir");
    println!("  -s, --steps          Override the fixture's step count");
}
