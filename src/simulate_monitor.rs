use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::error::SourceError;
use crate::model::Observation;
use crate::monitor::PacketSource;
use crate::protocol::SIMULATED_PROTOCOLS;

const TICK: Duration = Duration::from_millis(200);
const INBOUND_PROBABILITY: f64 = 0.6;

/// 合成流量生成器：在服务器与五个客户端之间随机产生数据包
pub struct SimulatedSource {
    server_address: String,
    clients: Vec<String>,
    producers: usize,
    duration: Option<Duration>,
    running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl SimulatedSource {
    /// `duration` 为 None 时一直运行到 `stop()`
    pub fn new(server_address: String, producers: usize, duration: Option<Duration>) -> Self {
        Self {
            server_address,
            clients: (10..15).map(|i| format!("192.168.0.{}", i)).collect(),
            producers: producers.max(1),
            duration,
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            workers: Vec::new(),
        }
    }

    /// 生成一批（1~6 个）观测
    fn generate_batch<R: Rng>(rng: &mut R, server: &str, clients: &[String]) -> Vec<Observation> {
        let ts = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let count: usize = rng.gen_range(1..=6);
        let mut batch = Vec::with_capacity(count);

        for _ in 0..count {
            let (Some(client), Some(protocol)) = (
                clients.choose(&mut *rng),
                SIMULATED_PROTOCOLS.choose(&mut *rng),
            ) else {
                break;
            };
            let length: u64 = rng.gen_range(100..=2000);
            let (src, dst) = if rng.gen_bool(INBOUND_PROBABILITY) {
                (client.as_str(), server)
            } else {
                (server, client.as_str())
            };
            batch.push(Observation::new(ts, src, dst, *protocol, length));
        }
        batch
    }
}

impl PacketSource for SimulatedSource {
    fn init(&mut self) -> Result<(), SourceError> {
        info!(
            server = %self.server_address,
            producers = self.producers,
            duration = ?self.duration,
            "模拟数据源初始化完成"
        );
        Ok(())
    }

    fn start(&mut self, aggregator: Arc<Aggregator>) -> Result<(), SourceError> {
        if !self.workers.is_empty() {
            return Err(SourceError::AlreadyRunning(self.name()));
        }
        self.running.store(true, Ordering::SeqCst);

        for id in 0..self.producers {
            let running = Arc::clone(&self.running);
            let active = Arc::clone(&self.active);
            let aggregator = Arc::clone(&aggregator);
            let server = self.server_address.clone();
            let clients = self.clients.clone();
            let duration = self.duration;

            active.fetch_add(1, Ordering::SeqCst);
            let handle = thread::Builder::new()
                .name(format!("simulate-{}", id))
                .spawn(move || {
                    let started = Instant::now();
                    let mut rng = rand::thread_rng();
                    let mut sent = 0u64;
                    while running.load(Ordering::SeqCst)
                        && duration.map_or(true, |d| started.elapsed() < d)
                    {
                        for observation in Self::generate_batch(&mut rng, &server, &clients) {
                            aggregator.record(&observation);
                            sent += 1;
                        }
                        thread::sleep(TICK);
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                    debug!(producer = id, sent, "模拟生产者退出");
                });

            match handle {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    self.running.store(false, Ordering::SeqCst);
                    return Err(SourceError::Spawn(e));
                }
            }
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        !self.workers.is_empty() && self.active.load(Ordering::SeqCst) == 0
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.running.store(false, Ordering::SeqCst);

        let mut panicked = false;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("模拟生产者线程 panic");
                panicked = true;
            }
        }
        if panicked {
            return Err(SourceError::ThreadPanicked);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulate"
    }
}
