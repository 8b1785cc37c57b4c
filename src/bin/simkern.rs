//! simkern CLI - load synthetic programs and run the simulation
//!
//! Usage: simkern [--json] [--config FILE] [-v|-vv] PROGRAM...
//!
//! Each PROGRAM is a synthetic process description (see the crate docs for
//! the format). The simulation runs until every process has terminated and
//! the disk has drained, then the kernel's event log is printed, one event
//! per line (JSON lines with `--json`).

use log::{LevelFilter, Metadata, Record};
use simkern::kernel::KernelConfig;
use simkern::program;
use simkern::runtime::SharedKernel;
use std::process::ExitCode;

/// Minimal stderr logger behind the `log` facade.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

struct Args {
    json: bool,
    config: Option<String>,
    verbosity: u8,
    programs: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        json: false,
        config: None,
        verbosity: 0,
        programs: Vec::new(),
    };

    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--json" => args.json = true,
            "--config" => {
                args.config = Some(argv.next().ok_or("--config needs a file argument")?);
            }
            "-v" => args.verbosity = 1,
            "-vv" => args.verbosity = 2,
            "--help" | "-h" => {
                return Err("usage: simkern [--json] [--config FILE] [-v|-vv] PROGRAM...".into());
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown flag: {other}"));
            }
            path => args.programs.push(path.to_string()),
        }
    }

    if args.programs.is_empty() {
        return Err("no programs given; usage: simkern [--json] [--config FILE] PROGRAM...".into());
    }
    Ok(args)
}

fn load_config(path: Option<&str>) -> Result<KernelConfig, String> {
    match path {
        None => Ok(KernelConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read config {path}: {e}"))?;
            serde_json::from_str(&text).map_err(|e| format!("bad config {path}: {e}"))
        }
    }
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    log::set_logger(&LOGGER).expect("logger installed twice");
    log::set_max_level(match args.verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Trace,
    });

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let shared = SharedKernel::new(config);
    let handles = shared.start();

    for path in &args.programs {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("cannot read program {path}: {e}");
                return ExitCode::FAILURE;
            }
        };
        match program::parse(&source) {
            Ok(parsed) => {
                let pid = shared.admit(parsed);
                log::info!("{path} admitted as {pid}");
            }
            Err(e) => {
                eprintln!("{path}: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    shared.wait_quiescent();
    shared.shutdown();
    handles.join();

    let events = shared.with(|kernel| kernel.drain_events());
    for event in &events {
        if args.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("event serialization failed: {e}"),
            }
        } else {
            println!("{event}");
        }
    }

    ExitCode::SUCCESS
}
