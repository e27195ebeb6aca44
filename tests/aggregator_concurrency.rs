use std::sync::{Arc, Barrier};
use std::thread;

use ip_traffic_window::{window_start, Aggregator, AggregatorConfig, Observation, WindowSize};

const SERVER: &str = "192.168.0.5";
const CLIENT: &str = "192.168.0.10";
const T: f64 = 1_700_000_001.0;

fn shared_aggregator() -> Arc<Aggregator> {
    Arc::new(Aggregator::new(AggregatorConfig::new(
        SERVER,
        WindowSize::new(5).unwrap(),
    )))
}

#[test]
fn concurrent_records_lose_no_updates() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: u64 = 1000;

    let aggregator = shared_aggregator();
    let barrier = Arc::new(Barrier::new(PRODUCERS));

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let aggregator = Arc::clone(&aggregator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let obs = Observation::new(T, CLIENT, SERVER, "HTTP", 1);
                barrier.wait();
                for _ in 0..PER_PRODUCER {
                    aggregator.record(&obs);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = aggregator.drain_all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].bytes_in, PER_PRODUCER * PRODUCERS as u64);
    assert_eq!(rows[0].bytes_out, 0);
    assert_eq!(rows[0].window_start, window_start(T, WindowSize::new(5).unwrap()));
}

#[test]
fn mixed_directions_stay_paired() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u64 = 1000;

    let aggregator = shared_aggregator();
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|i| {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                let obs = if i % 2 == 0 {
                    Observation::new(T, CLIENT, SERVER, "HTTPS", 2)
                } else {
                    Observation::new(T, SERVER, CLIENT, "HTTPS", 3)
                };
                for _ in 0..PER_PRODUCER {
                    aggregator.record(&obs);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = aggregator.drain_all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].bytes_in, 2 * 2 * PER_PRODUCER);
    assert_eq!(rows[0].bytes_out, 2 * 3 * PER_PRODUCER);
}

/// 写入与刷新并发进行时，每个字节恰好被输出一次
#[test]
fn draining_while_recording_emits_each_byte_once() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u64 = 2000;

    let aggregator = shared_aggregator();
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    // 跨越多个窗口
                    let ts = T + (n / 100) as f64;
                    aggregator.record(&Observation::new(ts, CLIENT, SERVER, "FTP", 1));
                }
            })
        })
        .collect();

    let mut emitted = Vec::new();
    while handles.iter().any(|h| !h.is_finished()) {
        emitted.extend(aggregator.drain(T + 10.0));
        thread::yield_now();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    emitted.extend(aggregator.drain_all());

    let total: u64 = emitted.iter().map(|row| row.bytes_in).sum();
    assert_eq!(total, PRODUCERS as u64 * PER_PRODUCER);
    assert_eq!(aggregator.open_buckets(), 0);
}
