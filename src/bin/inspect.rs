//! chainlog Inspect Binary
//!
//! Prints the directory, segment tables and checkpoint history of a log,
//! and optionally every record. Opens all device files read-only.

use std::path::PathBuf;

use chainlog::device::Device;
use chainlog::record::{LogRecord, RecordBody};
use chainlog::wal::LogReader;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// chainlog Inspector
#[derive(Parser, Debug)]
#[command(name = "chainlog-inspect")]
#[command(about = "Inspect a chained write-ahead log without modifying it")]
#[command(version)]
struct Args {
    /// Path of the master device file
    path: PathBuf,

    /// Print every record from the log start
    #[arg(short, long)]
    records: bool,

    /// With --records, start at the first segment instead of the log start
    #[arg(short, long)]
    all: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chainlog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("chainlog inspect v{}", chainlog::VERSION);

    let mut reader = match LogReader::open(&args.path) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!("Failed to open log at {}: {}", args.path.display(), e);
            std::process::exit(1);
        }
    };

    print_directory(&reader);
    for device in reader.devices() {
        print_segments(device);
    }

    if args.records {
        println!();
        println!("records:");
        let records = if args.all {
            reader.all_records()
        } else {
            reader.records()
        };

        for item in records {
            match item {
                Ok((position, record)) => println!("  {:<16} {}", position.to_string(), describe(&record)),
                Err(e) => {
                    tracing::error!("Read failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn print_directory(reader: &LogReader) {
    let metadata = reader.metadata();
    println!("log start:    {}", metadata.log_start);
    println!("log end:      {}", metadata.log_end);
    println!("last segment: {}", metadata.last_segment);

    println!();
    println!("devices:");
    for device in &metadata.devices {
        println!("  {:>5}  {:<16} {}", device.id, device.name, device.path.display());
    }

    println!();
    println!("checkpoints:");
    for entry in metadata.checkpoints.entries() {
        match entry.end {
            Some(end) => println!("  {} .. {}", entry.begin, end),
            None => println!("  {} .. (incomplete)", entry.begin),
        }
    }
}

fn print_segments(device: &Device) {
    let root = device.root();
    println!();
    println!(
        "device {} ({}) generation {}: {} pages, growth {}, max {}",
        device.id(),
        device.name(),
        device.generation(),
        root.allocated_pages,
        root.growth_pages,
        root.max_pages
    );
    for segment in device.descriptors() {
        let link = |l: Option<chainlog::SegmentId>| l.map_or_else(|| "-".to_string(), |s| s.to_string());
        println!(
            "  {}  offset {:>10}  length {:>8}  {}{}  prev {:<9}  next {}",
            segment.id,
            segment.start_offset,
            segment.length,
            if segment.allocated { "A" } else { "-" },
            if segment.full { "F" } else { "-" },
            link(segment.prev),
            link(segment.next),
        );
    }
}

fn describe(record: &LogRecord) -> String {
    let head = format!("#{:<8} {:?}", record.sequence_id, record.kind());
    match &record.body {
        RecordBody::NoOp => head,
        RecordBody::BeginCheckpoint { active } | RecordBody::EndCheckpoint { active } => {
            let ids: Vec<String> = active.iter().map(|t| t.transaction_id.to_string()).collect();
            format!("{} active=[{}]", head, ids.join(","))
        }
        RecordBody::BeginTransaction { transaction_id }
        | RecordBody::CommitTransaction { transaction_id }
        | RecordBody::RollbackTransaction { transaction_id } => {
            format!("{} txn={}", head, transaction_id)
        }
        RecordBody::Page(page) => format!(
            "{} txn={} page={} ts={}",
            head, page.transaction_id, page.page_id, page.timestamp
        ),
    }
}
