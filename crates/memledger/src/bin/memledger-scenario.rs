//! Drives a fresh tracker through one allocation scenario.
//!
//! Fault scenarios end with the tracker's exit status (10 for an invalid
//! pointer, 11 for out-of-memory, unless overridden through the
//! `MEMLEDGER_*_EXIT_STATUS` variables); everything else exits 0.

use std::process::ExitCode;
use std::ptr;

use clap::{Parser, Subcommand};
use memledger::{LogFormat, Tracker, TrackerConfig};

/// Allocation tracking scenarios.
#[derive(Debug, Parser)]
#[command(name = "memledger-scenario")]
#[command(about = "Run allocation tracking scenarios against a fresh tracker")]
struct Cli {
    /// Suppress per-operation log lines.
    #[arg(long, global = true)]
    quiet: bool,
    /// Emit log lines and heap dumps as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Allocate, grow, shrink and release one block, then dump the heap.
    ResizeCycle,
    /// Allocate 20 and 25 bytes and dump the heap.
    DumpPair,
    /// Release a stack address.
    ReleaseInvalid,
    /// Release null, then report the live count.
    ReleaseNull,
    /// Release the same block twice.
    DoubleRelease,
    /// Resize a stack address.
    ResizeInvalid,
    /// Allocate and release from many threads against one tracker.
    Stress {
        #[arg(long, default_value_t = 8)]
        threads: usize,
        #[arg(long, default_value_t = 1000)]
        ops: usize,
    },
    /// Leave some blocks live and print them as leaks.
    LeakReport,
    /// Request an impossible allocation.
    OutOfMemory,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    let config = TrackerConfig::from_env()
        .tracking(true)
        .verbose(!cli.quiet)
        .log_format(format);
    let tracker = Tracker::new(config);

    match cli.command {
        Command::ResizeCycle => {
            let p = tracker.allocate(20);
            // SAFETY: tracking is on, so unknown pointers are faults.
            unsafe {
                let q = tracker.resize(p, 40);
                let r = tracker.resize(q, 10);
                tracker.release(r);
            }
            tracker.print_heap();
        }
        Command::DumpPair => {
            let a = tracker.allocate(20);
            let b = tracker.allocate(25);
            tracker.print_heap();
            // SAFETY: tracking is on.
            unsafe {
                tracker.release(a);
                tracker.release(b);
            }
        }
        Command::ReleaseInvalid => {
            let mut local = 0u8;
            // SAFETY: tracking is on; the stack address is reported, not freed.
            unsafe { tracker.release(ptr::from_mut(&mut local)) };
            println!("unreachable: invalid release returned");
        }
        Command::ReleaseNull => {
            // SAFETY: null is always accepted.
            unsafe { tracker.release(ptr::null_mut()) };
            println!("live: {}", tracker.live_count());
        }
        Command::DoubleRelease => {
            let p = tracker.allocate(16);
            // SAFETY: tracking is on.
            unsafe {
                tracker.release(p);
                tracker.release(p);
            }
            println!("unreachable: double release returned");
        }
        Command::ResizeInvalid => {
            let mut local = [0u8; 8];
            // SAFETY: tracking is on; the stack address is reported, not resized.
            unsafe { tracker.resize(local.as_mut_ptr(), 64) };
            println!("unreachable: invalid resize returned");
        }
        Command::Stress { threads, ops } => {
            std::thread::scope(|scope| {
                for worker in 0..threads {
                    let tracker = &tracker;
                    scope.spawn(move || churn(tracker, worker, ops));
                }
            });
            let live = tracker.live_count();
            println!("live: {live}");
            if live != 0 {
                return ExitCode::FAILURE;
            }
        }
        Command::LeakReport => {
            let kept: Vec<*mut u8> = [8, 16, 32].into_iter().map(|n| tracker.allocate(n)).collect();
            // SAFETY: tracking is on.
            unsafe { tracker.release(kept[1]) };
            let leaks = tracker.leaks();
            println!("leaked {} blocks, {} bytes", leaks.count, leaks.total_bytes);
            tracker.print_heap();
        }
        Command::OutOfMemory => {
            let _live = tracker.allocate(16);
            let _ = tracker.allocate(usize::MAX);
            println!("unreachable: impossible allocation returned");
        }
    }
    ExitCode::SUCCESS
}

fn churn(tracker: &Tracker, worker: usize, ops: usize) {
    let mut held: Vec<*mut u8> = Vec::with_capacity(16);
    for i in 0..ops {
        let size = 1 + (worker * 31 + i * 7) % 256;
        match i % 4 {
            0 | 1 => held.push(tracker.allocate(size)),
            2 => {
                if let Some(p) = held.pop() {
                    // SAFETY: `p` came from this tracker and tracking is on.
                    held.push(unsafe { tracker.resize(p, size * 2) });
                }
            }
            _ => {
                if let Some(p) = held.pop() {
                    // SAFETY: as above.
                    unsafe { tracker.release(p) };
                }
            }
        }
    }
    for p in held {
        // SAFETY: as above.
        unsafe { tracker.release(p) };
    }
}
