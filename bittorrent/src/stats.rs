use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// Aggregate, torrent-wide counters. Cheap to update from any peer session
// concurrently; a `Statistics` snapshot is taken on demand rather than kept
// up to date continuously.
#[derive(Debug, Default)]
pub struct Stats {

    uploaded:   AtomicU64,
    downloaded: AtomicU64,
    connected:  AtomicUsize,
    interesting: AtomicUsize,

}

impl Stats {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_uploaded(&self, n: u64) {
        self.uploaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_downloaded(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn peer_connected(&self) {
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_disconnected(&self) {
        self.connected.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn became_interesting(&self) {
        self.interesting.fetch_add(1, Ordering::Relaxed);
    }

    pub fn became_uninteresting(&self) {
        self.interesting.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, length: u64, left: u64, peers_count: usize) -> Statistics {
        Statistics {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            left,
            peers_count,
            connected: self.connected.load(Ordering::Relaxed),
            interesting: self.interesting.load(Ordering::Relaxed),
            length,
        }
    }
}

// An immutable, point-in-time view of a torrent's progress, returned to
// whoever is driving the client (CLI, UI, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {

    pub uploaded: u64,

    pub downloaded: u64,

    pub left: u64,

    pub peers_count: usize,

    pub connected: usize,

    pub interesting: usize,

    pub length: u64,

}

// Smoothed per-peer throughput, tracked separately from the aggregate
// `Stats` above so session logic can log instantaneous rates.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThroughputStats {

    pub up: Counter,

    pub down: Counter,

}

impl ThroughputStats {
    pub fn reset(&mut self) {
        self.up.reset();
        self.down.reset();
    }
}

impl std::ops::AddAssign<&ThroughputStats> for ThroughputStats {
    fn add_assign(&mut self, other: &ThroughputStats) {
        self.up += other.up.round();
        self.down += other.down.round();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Counter {
    total: u64,
    round: u64,
    avg: f64,
    peak: f64,
}

impl Counter {

    pub fn add(&mut self, n: u64) {
        self.total += n;
        self.round += n;
    }

    pub fn reset(&mut self) {
        self.avg = (self.avg * (5 - 1) as f64 / 5.0) + (self.round as f64 / 5.0);
        self.round = 0;
        if self.avg > self.peak {
            self.peak = self.avg;
        }
    }

    pub fn avg(&self) -> u64 {
        self.avg as u64
    }

    pub fn peak(&self) -> u64 {
        self.peak as u64
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn round(&self) -> u64 {
        self.round
    }

}

impl std::ops::AddAssign<u64> for Counter {
    fn add_assign(&mut self, n: u64) {
        self.add(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_accumulated_counters() {
        let stats = Stats::new();
        stats.add_uploaded(100);
        stats.add_downloaded(200);
        stats.peer_connected();
        stats.peer_connected();
        stats.became_interesting();

        let snap = stats.snapshot(1000, 800, 2);
        assert_eq!(snap.uploaded, 100);
        assert_eq!(snap.downloaded, 200);
        assert_eq!(snap.left, 800);
        assert_eq!(snap.length, 1000);
        assert_eq!(snap.peers_count, 2);
        assert_eq!(snap.connected, 2);
        assert_eq!(snap.interesting, 1);
    }

    #[test]
    fn counter_smooths_towards_round_throughput() {
        let mut counter = Counter::default();
        counter.add(100);
        counter.reset();
        assert_eq!(counter.total(), 100);
        assert_eq!(counter.round(), 0);
        assert!(counter.avg() > 0);
    }
}
