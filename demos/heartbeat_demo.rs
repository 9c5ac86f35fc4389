//! Demonstration of heartbeat aggregation.
//!
//! This example shows how to:
//! 1. Open an interval store in a scratch directory
//! 2. Feed heartbeats for a few entities through the aggregator
//! 3. Watch intervals extend and split on the gap threshold
//! 4. Close silent intervals with the sweeper
//!
//! Run with: cargo run --example heartbeat_demo

use std::sync::Arc;
use std::thread;

use heartbeat_intervals::{
    core::{EntityKey, Heartbeat, HeartbeatAggregator, QueryService, RetryPolicy, StaleSweeper},
    stats::create_shared_stats,
    store::open_shared,
};

const GAP_SECS: i64 = 60;

fn main() {
    println!("Heartbeat Intervals - Aggregation Demo");
    println!("======================================");
    println!();

    let dir = std::env::temp_dir().join(format!("heartbeat-demo-{}", std::process::id()));
    let store = match open_shared(&dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open store at {dir:?}: {e}");
            return;
        }
    };
    println!("Store: {dir:?}");
    println!("Gap threshold: {GAP_SECS}s");
    println!();

    let stats = create_shared_stats();
    let aggregator = Arc::new(
        HeartbeatAggregator::new(store.clone(), GAP_SECS, RetryPolicy::default())
            .with_stats(stats.clone()),
    );
    let query = QueryService::new(store.clone());

    // A laptop that goes quiet for a while, then comes back
    let laptop = EntityKey::new("acme", "alice", "laptop");
    for ts in [0, 20, 45, 50, 300, 310] {
        match aggregator.record(&Heartbeat::new(laptop.clone(), ts)) {
            Ok((interval, outcome)) => println!(
                "  {laptop} @ {ts:>4}: {outcome:?} -> [{}, {}]",
                interval.ts_start, interval.ts_end
            ),
            Err(e) => eprintln!("  {laptop} @ {ts:>4}: error: {e}"),
        }
    }
    println!();

    // Several phones reporting from their own threads
    println!("Recording phone heartbeats from 4 threads...");
    let handles: Vec<_> = (0..4)
        .map(|n| {
            let aggregator = aggregator.clone();
            thread::spawn(move || {
                let device = format!("phone-{}", n % 2);
                for ts in (0..200).step_by(15) {
                    if let Err(e) = aggregator.record_heartbeat("acme", "bob", &device, ts + n) {
                        eprintln!("  {device} @ {ts}: error: {e}");
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        let _ = handle.join();
    }
    println!();

    print_intervals("All intervals", query.list_all());
    print_intervals("Open intervals", query.list_active());

    println!("Sweeping at t=400...");
    let sweeper = StaleSweeper::new(store, GAP_SECS, RetryPolicy::default()).with_stats(stats.clone());
    match sweeper.sweep(400) {
        Ok(report) => println!(
            "  scanned {}, closed {}",
            report.scanned,
            report.closed.len()
        ),
        Err(e) => eprintln!("  sweep failed: {e}"),
    }
    println!();

    print_intervals("Open intervals after sweep", query.list_active());

    println!("{}", stats.summary());

    drop(query);
    drop(sweeper);
    drop(aggregator);
    let _ = std::fs::remove_dir_all(&dir);
}

fn print_intervals(
    title: &str,
    result: heartbeat_intervals::error::Result<Vec<heartbeat_intervals::Interval>>,
) {
    println!("{title}:");
    match result {
        Ok(intervals) if intervals.is_empty() => println!("  (none)"),
        Ok(intervals) => {
            for interval in intervals {
                println!(
                    "  {}/{}/{}  [{}, {}]{}",
                    interval.group,
                    interval.user,
                    interval.device,
                    interval.ts_start,
                    interval.ts_end,
                    if interval.active { "  open" } else { "" }
                );
            }
        }
        Err(e) => eprintln!("  error: {e}"),
    }
    println!();
}
