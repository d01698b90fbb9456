use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Record {
    ports: HashSet<u16>,
    window_start: Instant,
    last_seen: Instant,
}

/// Flags a source IP that touches more than `threshold` distinct source
/// ports within `window` — a proxy for scanning/flooding behavior on a
/// server that otherwise only ever sees one listening port.
pub struct PortScanDetector {
    threshold: usize,
    window: Duration,
    records: RwLock<HashMap<IpAddr, Record>>,
}

impl PortScanDetector {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self { threshold, window, records: RwLock::new(HashMap::new()) }
    }

    /// Records one connection attempt from `(ip, port)` and returns `true`
    /// if `ip` has now crossed the distinct-port threshold within the
    /// current window.
    pub fn observe(&self, ip: IpAddr, port: u16) -> bool {
        let now = Instant::now();
        let mut records = self.records.write();
        let record = records.entry(ip).or_insert_with(|| Record {
            ports: HashSet::new(),
            window_start: now,
            last_seen: now,
        });

        if now.duration_since(record.window_start) > self.window {
            record.ports.clear();
            record.window_start = now;
        }

        record.ports.insert(port);
        record.last_seen = now;
        record.ports.len() > self.threshold
    }

    pub fn sweep(&self) {
        let now = Instant::now();
        let gc_after = self.window * 10;
        self.records.write().retain(|_, record| now.duration_since(record.last_seen) <= gc_after);
    }
}
