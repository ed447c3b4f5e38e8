use std::env;
use std::io;
use std::path::PathBuf;
use std::process;

use skmv_rs::dataset::{load_records, synthetic_records, Record};
use skmv_rs::driver::{run_experiment, MemoryBudget, RunReport, SketchParams, SweepGrid};

const USAGE: &str = "usage: skmv-rs [--window=N] [--k=K] [--m=M] [--delta1=BITS] [--delta2=BITS] \
[--memory=BYTES] [--synthetic=COUNT:FLOWS:RANGE] [--sweep] [--json] [<dataset>]";

struct Options {
    window: u64,
    k: u32,
    m: u32,
    delta1: u32,
    delta2: u32,
    memory_bytes: Option<u64>,
    synthetic: Option<(usize, u64, u64)>,
    sweep: bool,
    json: bool,
    path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            window: 1000,
            k: 64,
            m: 64,
            delta1: 32,
            delta2: 32,
            memory_bytes: None,
            synthetic: None,
            sweep: false,
            json: false,
            path: None,
        }
    }
}

fn usage_exit() -> ! {
    eprintln!("{USAGE}");
    process::exit(2);
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid value for {flag}: {value}");
        usage_exit();
    })
}

fn parse_synthetic(value: &str) -> (usize, u64, u64) {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        eprintln!("--synthetic expects COUNT:FLOWS:RANGE, got: {value}");
        usage_exit();
    }
    (
        parse_value("--synthetic", parts[0]),
        parse_value("--synthetic", parts[1]),
        parse_value("--synthetic", parts[2]),
    )
}

fn parse_args() -> Options {
    let mut opts = Options::default();
    for arg in env::args_os().skip(1) {
        let Some(arg) = arg.to_str() else {
            usage_exit();
        };
        if let Some((flag, value)) = arg.split_once('=') {
            match flag {
                "--window" => opts.window = parse_value(flag, value),
                "--k" => opts.k = parse_value(flag, value),
                "--m" => opts.m = parse_value(flag, value),
                "--delta1" => opts.delta1 = parse_value(flag, value),
                "--delta2" => opts.delta2 = parse_value(flag, value),
                "--memory" => opts.memory_bytes = Some(parse_value(flag, value)),
                "--synthetic" => opts.synthetic = Some(parse_synthetic(value)),
                _ => {
                    eprintln!("unknown flag: {flag}");
                    usage_exit();
                }
            }
            continue;
        }
        match arg {
            "--sweep" => opts.sweep = true,
            "--json" => opts.json = true,
            "--help" | "-h" => {
                eprintln!("{USAGE}");
                process::exit(0);
            }
            _ if arg.starts_with("--") => {
                eprintln!("unknown flag: {arg}");
                usage_exit();
            }
            _ => {
                if opts.path.is_some() {
                    usage_exit();
                }
                opts.path = Some(PathBuf::from(arg));
            }
        }
    }
    opts
}

fn load_stream(opts: &Options) -> io::Result<Vec<Record>> {
    if let Some((count, flows, range)) = opts.synthetic {
        eprintln!("generating {count} synthetic records ({flows} flows, {range} values)");
        return Ok(synthetic_records(count, flows, range, 42));
    }
    let Some(path) = &opts.path else {
        eprintln!("either a dataset path or --synthetic is required");
        usage_exit();
    };
    let (records, stats) = load_records(path)?;
    eprintln!(
        "loaded {} records from {} ({} lines, {} skipped, {} malformed)",
        stats.records,
        path.display(),
        stats.lines,
        stats.skipped,
        stats.malformed
    );
    Ok(records)
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("report serialization failed: {err}"),
        }
        return;
    }
    let p = report.params;
    println!(
        "n={} k={} m={} delta1={} delta2={} memory={}b records={} cleans={} \
         time={:.3}s throughput={:.0}/s estimate={:.2}",
        p.n,
        p.k,
        p.m,
        p.delta1,
        p.delta2,
        report.memory_bits / 8,
        report.records,
        report.cleans,
        report.seconds,
        report.throughput,
        report.estimate
    );
}

fn main() -> io::Result<()> {
    let opts = parse_args();
    let records = load_stream(&opts)?;

    if opts.sweep {
        let grid = SweepGrid::default();
        eprintln!("sweeping {} parameter combinations", grid.len());
        for result in grid.run(opts.window, &records) {
            match result {
                Ok(report) => print_report(&report, opts.json),
                Err(err) => eprintln!("configuration skipped: {err}"),
            }
        }
        return Ok(());
    }

    let params = match opts.memory_bytes {
        Some(bytes) => MemoryBudget {
            bytes,
            k: opts.k,
            delta1: opts.delta1,
            delta2: opts.delta2,
        }
        .plan(opts.window),
        None => SketchParams {
            n: opts.window,
            k: opts.k,
            m: opts.m,
            delta1: opts.delta1,
            delta2: opts.delta2,
        },
    };

    match run_experiment(params, &records) {
        Ok(report) => print_report(&report, opts.json),
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            process::exit(2);
        }
    }
    Ok(())
}
