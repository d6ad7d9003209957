//! CLI entrypoint for the hunkdl conformance harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hunkdl_core::exports::ExportTable;
use hunkdl_core::host::sim::SimHost;
use hunkdl_core::host::{ProcessHost, Segment};
use hunkdl_core::hunk::{FileStream, scan_exports};
use hunkdl_core::loader::Loader;
use hunkdl_harness::scenarios;
use hunkdl_harness::structured_log::{LogEmitter, LogLevel};
use hunkdl_harness::{ConformanceReport, FixtureSet, ScenarioRunner};

/// Conformance tooling for the hunkdl loader.
#[derive(Debug, Parser)]
#[command(name = "hunkdl-harness")]
#[command(about = "Conformance testing harness for the hunkdl loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the built-in fixture suite as digest-guarded JSON.
    Generate {
        /// Output path (stdout if omitted).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replay a fixture suite and report the results.
    Verify {
        /// Fixture JSON path; the built-in suite when omitted.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        /// Markdown report path; a .json twin is written next to it.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Walk a hunk image file and list the exports it would publish.
    Dump {
        /// Image path.
        #[arg(long)]
        image: PathBuf,
        /// Base address of the first synthetic segment.
        #[arg(long, default_value_t = 0x0010_0000)]
        base: u64,
        /// Spacing between synthetic segment bases.
        #[arg(long, default_value_t = 0x0001_0000)]
        stride: u64,
        /// How many synthetic segments to provision.
        #[arg(long, default_value_t = 64)]
        segments: usize,
    },
    /// Load the demo module on a simulated host and peek its exports.
    Demo,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Generate { out } => {
            let suite = scenarios::builtin_suite()?;
            match out {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    suite.to_file(&path)?;
                    eprintln!("Wrote {} cases to {}", suite.cases.len(), path.display());
                }
                None => println!("{}", suite.to_json()?),
            }
        }
        Command::Verify {
            fixtures,
            report,
            log,
        } => {
            let suite = match fixtures {
                Some(path) => {
                    eprintln!("Replaying fixtures from {}", path.display());
                    FixtureSet::from_file(&path)?
                }
                None => {
                    eprintln!("Replaying the built-in suite");
                    scenarios::builtin_suite()?
                }
            };

            let results = ScenarioRunner::new().run(&suite);
            let doc = ConformanceReport::new(&suite.suite, results);

            if let Some(log_path) = log {
                if let Some(parent) = log_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let run_id = format!("verify-{}", std::process::id());
                let mut emitter = LogEmitter::to_file(&log_path, &run_id)?;
                emitter.emit(LogLevel::Info, "run_started")?;
                for result in &doc.results {
                    emitter.emit_result(&doc.suite, result)?;
                }
                emitter.emit(LogLevel::Info, "run_finished")?;
                emitter.flush()?;
            }

            eprintln!(
                "Verification complete: total={}, passed={}, failed={}",
                doc.summary.total, doc.summary.passed, doc.summary.failed
            );

            match report {
                Some(report_path) => {
                    if let Some(parent) = report_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&report_path, doc.to_markdown())?;
                    std::fs::write(report_path.with_extension("json"), doc.to_json()?)?;
                    eprintln!("Wrote report to {}", report_path.display());
                }
                None => print!("{}", doc.to_markdown()),
            }

            if !doc.all_passed() {
                return Err("conformance verification failed".into());
            }
        }
        Command::Dump {
            image,
            base,
            stride,
            segments,
        } => {
            let mut stream = FileStream::open(&image)?;
            let chain: Vec<Segment> = (0..segments)
                .map(|index| Segment {
                    base: base + stride * index as u64,
                })
                .collect();
            let mut table = ExportTable::new();
            let stats = scan_exports(&mut stream, &chain, &mut table)?;

            println!(
                "{}: {} records, {} symbol hunks, {} exports",
                image.display(),
                stats.records,
                stats.symbol_hunks,
                stats.exports
            );
            for binding in table.bindings() {
                let address = binding.address();
                println!(
                    "  seg {:>2}  +{:#06x}  {}",
                    (address - base) / stride,
                    (address - base) % stride,
                    binding.name_lossy()
                );
            }
        }
        Command::Demo => {
            let built = scenarios::demo_module();
            let host = SimHost::new();
            host.install_image("demo.library", built.sim_image());
            let mut loader = Loader::new(host.clone());

            let Some(handle) = loader.open("demo.library", 0) else {
                let reason = loader.error().unwrap_or("no message latched");
                return Err(format!("demo module failed to load: {reason}").into());
            };
            for export in &built.exports {
                match loader.sym(Some(handle), export.name.as_bytes()) {
                    Some(address) => {
                        let peeked = host.peek_u32(address).map_or_else(
                            || "(unreadable)".to_string(),
                            |word| format!("{word:#010x}"),
                        );
                        println!("{:<14} -> {address:#010x}  reads {peeked}", export.name);
                    }
                    None => println!("{:<14} -> (absent)", export.name),
                }
            }
            // The miss stays silent, the way dlsym misses do.
            if loader.sym(Some(handle), b"exportedVar3").is_none() && loader.error().is_none() {
                println!("{:<14} -> (absent, nothing latched)", "exportedVar3");
            }
            let code = loader.close(Some(handle));
            println!("close -> {code}");
            if code != 0 {
                return Err("demo module failed to close".into());
            }
        }
    }

    Ok(())
}
