use std::fs::File;
use std::io::LineWriter;
use std::process::ExitCode;

use clap::Parser;
use clap_num::maybe_hex;

use rv32sim::image::load_image;
use rv32sim::platform::{Outcome, Platform};

/// Simulate a 32-bit RISC-V machine from a text hex memory image
///
/// Loads the image into a 32 KiB memory window at 0x80000000 and
/// executes from there until the guest runs ebreak, writing a trace
/// of every retired instruction, trap and cache access to the output
/// file, followed by cache hit-rate statistics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the input memory image
    input: String,

    /// Path to the output trace file
    output: String,

    /// Stop after this many steps even if the guest has not halted
    /// (use 0x prefix for hexadecimal)
    #[arg(short, long, value_parser=maybe_hex::<u64>)]
    limit: Option<u64>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let trace_file = match File::create(&args.output) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to create trace file {}: {e}", args.output);
            return ExitCode::FAILURE;
        }
    };
    let mut platform = Platform::new(LineWriter::new(trace_file));

    if let Err(e) = load_image(&mut platform, &args.input) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let mut steps = 0u64;
    loop {
        match platform.step() {
            Ok(Outcome::Halted) => break,
            Ok(Outcome::Running) => {}
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
        steps += 1;
        if args.limit.is_some_and(|limit| steps >= limit) {
            eprintln!(
                "stopping: step limit of {steps} reached before the \
                 guest halted"
            );
            let _ = platform.finish();
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = platform.finish() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
