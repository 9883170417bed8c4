// Fixed-capacity sample history and derived-metric math.

use crate::config::MetricsConfig;
use crate::models::{ConnectionSample, DomainSample, GuestCounters, HostInfo};
use std::collections::VecDeque;

/// Hard floor for the configured history length.
pub const MIN_HISTORY_LENGTH: usize = 10;

/// Moving-average window: the last min(5, ring length) samples.
const MOVING_AVG_WINDOW: usize = 5;

const NS_PER_MS: u64 = 1_000_000;

/// Newest-first ring of samples. Length never exceeds the configured
/// capacity; pushing beyond it drops the oldest sample.
#[derive(Debug, Clone)]
pub struct SampleRing<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> SampleRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            capacity: capacity.max(MIN_HISTORY_LENGTH),
        }
    }

    pub fn push(&mut self, sample: T) {
        self.buf.push_front(sample);
        self.buf.truncate(self.capacity);
    }

    pub fn newest(&self) -> Option<&T> {
        self.buf.front()
    }

    /// Sample at `index`, newest = 0.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.buf.get(index)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Applies a new capacity, trimming the tail if it shrank. Resolved per
    /// tick so per-connection overrides take effect without rebuilding rings.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(MIN_HISTORY_LENGTH);
        self.buf.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

/// Fixed-length, zero-padded, newest-first metric vector with exactly
/// `history_length + 1` slots, for sparkline-style consumers.
pub fn metric_vector<T, F>(ring: &SampleRing<T>, history_length: usize, f: F) -> Vec<f64>
where
    F: Fn(&T) -> f64,
{
    let slots = history_length + 1;
    let mut out: Vec<f64> = ring.iter().take(slots).map(f).collect();
    out.resize(slots, 0.0);
    out
}

/// CPU usage percent for a counter delta over a wall-clock window.
/// Clamped to [0, 100] so non-monotonic or missing-baseline counters never
/// produce negative or >100 values.
fn cpu_percent_of(delta_ns: u64, wall_ns: u64, active_cpus: u32) -> f64 {
    if wall_ns == 0 || active_cpus == 0 {
        return 0.0;
    }
    ((delta_ns as f64 * 100.0) / (wall_ns as f64 * active_cpus as f64)).clamp(0.0, 100.0)
}

fn mem_percent_of(kb: u64, host_kb: u64) -> f64 {
    if host_kb == 0 {
        return 0.0;
    }
    (kb as f64 * 100.0 / host_kb as f64).clamp(0.0, 100.0)
}

/// Rate in KB/sec between two cumulative counter readings. Negative
/// transients (counter reset at power-off) are floored to zero.
fn rate_kb_per_sec(cur_kb: u64, prev_kb: u64, dt_ms: u64) -> f64 {
    if dt_ms == 0 {
        return 0.0;
    }
    ((cur_kb as f64 - prev_kb as f64) / (dt_ms as f64 / 1000.0)).max(0.0)
}

/// Moving average of the cpu counter over the last min(5, ring length)
/// samples, counting the pending sample as newest. Returns (avg counter
/// delta, percent). A zero-width window yields percent 0 and falls back to
/// the raw counter for the delta.
fn cpu_moving_average(
    ring: &SampleRing<DomainSample>,
    newest_abs: u64,
    newest_ts_ms: u64,
    active_cpus: u32,
) -> (u64, f64) {
    let n = (ring.len() + 1).min(MOVING_AVG_WINDOW);
    let (oldest_abs, oldest_ts) = if n <= 1 {
        (newest_abs, newest_ts_ms)
    } else {
        // window index n-1 with the pending sample at 0 is ring slot n-2
        ring.get(n - 2)
            .map(|s| (s.cpu_time_abs, s.timestamp_ms))
            .unwrap_or((newest_abs, newest_ts_ms))
    };
    let elapsed_ns = newest_ts_ms.saturating_sub(oldest_ts).saturating_mul(NS_PER_MS);
    if elapsed_ns == 0 {
        return (newest_abs, 0.0);
    }
    let avg_delta = newest_abs.saturating_sub(oldest_abs) / n as u64;
    (avg_delta, cpu_percent_of(avg_delta, elapsed_ns, active_cpus))
}

/// Derives the next guest sample from raw counters. `ring` holds the prior
/// samples; the result has not been pushed yet. Disabled metric categories
/// derive as zero without touching history already collected for the others.
pub fn derive_domain_sample(
    ring: &SampleRing<DomainSample>,
    counters: &GuestCounters,
    host: &HostInfo,
    now_ms: u64,
    metrics: &MetricsConfig,
) -> DomainSample {
    let (prev_abs, prev_ts) = ring
        .newest()
        .map(|s| (s.cpu_time_abs, s.timestamp_ms))
        .unwrap_or((0, 0));
    let dt_ms = now_ms.saturating_sub(prev_ts);

    let mut sample = DomainSample {
        timestamp_ms: now_ms,
        vcpu_count: counters.vcpu_count,
        ..Default::default()
    };

    if metrics.enable_cpu {
        sample.cpu_time_abs = counters.cpu_time_ns;
        sample.cpu_time_delta = counters.cpu_time_ns.saturating_sub(prev_abs);
        sample.cpu_percent = cpu_percent_of(
            sample.cpu_time_delta,
            dt_ms.saturating_mul(NS_PER_MS),
            host.active_cpus,
        );
        let (avg, avg_percent) =
            cpu_moving_average(ring, counters.cpu_time_ns, now_ms, host.active_cpus);
        sample.cpu_time_moving_avg = avg;
        sample.cpu_moving_avg_percent = avg_percent;
    }

    if metrics.enable_mem {
        sample.cur_mem_kb = counters.cur_mem_kb;
        sample.max_mem_kb = counters.max_mem_kb;
        sample.cur_mem_percent = mem_percent_of(counters.cur_mem_kb, host.memory_kb);
        sample.max_mem_percent = mem_percent_of(counters.max_mem_kb, host.memory_kb);
    }

    if metrics.enable_disk {
        let (prev_rd, prev_wr) = ring
            .newest()
            .map(|s| (s.disk_rd_kb, s.disk_wr_kb))
            .unwrap_or((0, 0));
        sample.disk_rd_kb = counters.disk_rd_kb;
        sample.disk_wr_kb = counters.disk_wr_kb;
        sample.disk_rd_rate_kb = rate_kb_per_sec(counters.disk_rd_kb, prev_rd, dt_ms);
        sample.disk_wr_rate_kb = rate_kb_per_sec(counters.disk_wr_kb, prev_wr, dt_ms);
    }

    if metrics.enable_net {
        let (prev_rx, prev_tx) = ring
            .newest()
            .map(|s| (s.net_rx_kb, s.net_tx_kb))
            .unwrap_or((0, 0));
        sample.net_rx_kb = counters.net_rx_kb;
        sample.net_tx_kb = counters.net_tx_kb;
        sample.net_rx_rate_kb = rate_kb_per_sec(counters.net_rx_kb, prev_rx, dt_ms);
        sample.net_tx_rate_kb = rate_kb_per_sec(counters.net_tx_kb, prev_tx, dt_ms);
    }

    sample
}

/// Derives the next connection-wide aggregate sample. The aggregate cpu
/// counter can shrink when a guest stops; the delta clamps to zero.
pub fn derive_connection_sample(
    ring: &SampleRing<ConnectionSample>,
    memory_kb: u64,
    cpu_time_ns: u64,
    host: &HostInfo,
    now_ms: u64,
) -> ConnectionSample {
    let (prev_cpu, prev_ts) = ring
        .newest()
        .map(|s| (s.cpu_time_ns, s.timestamp_ms))
        .unwrap_or((0, 0));
    let delta = cpu_time_ns.saturating_sub(prev_cpu);
    let wall_ns = now_ms.saturating_sub(prev_ts).saturating_mul(NS_PER_MS);
    ConnectionSample {
        timestamp_ms: now_ms,
        memory_kb,
        cpu_time_ns,
        cpu_percent: cpu_percent_of(delta, wall_ns, host.active_cpus),
        mem_percent: mem_percent_of(memory_kb, host.memory_kb),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_metrics() -> MetricsConfig {
        MetricsConfig {
            enable_cpu: true,
            enable_mem: true,
            enable_disk: true,
            enable_net: true,
        }
    }

    fn host() -> HostInfo {
        HostInfo {
            active_cpus: 4,
            memory_kb: 1_000_000,
        }
    }

    fn counters(cpu_time_ns: u64, cur_mem_kb: u64) -> GuestCounters {
        GuestCounters {
            state_code: 1,
            cur_mem_kb,
            max_mem_kb: 800_000,
            vcpu_count: 2,
            cpu_time_ns,
            ..Default::default()
        }
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let mut ring: SampleRing<u32> = SampleRing::new(10);
        for i in 0..100 {
            ring.push(i);
            assert!(ring.len() <= 10);
        }
        assert_eq!(ring.len(), 10);
        assert_eq!(*ring.newest().unwrap(), 99);
    }

    #[test]
    fn ring_capacity_floors_at_minimum() {
        let ring: SampleRing<u32> = SampleRing::new(3);
        assert_eq!(ring.capacity(), MIN_HISTORY_LENGTH);
    }

    #[test]
    fn ring_shrink_trims_tail() {
        let mut ring: SampleRing<u32> = SampleRing::new(50);
        for i in 0..50 {
            ring.push(i);
        }
        ring.set_capacity(12);
        assert_eq!(ring.len(), 12);
        assert_eq!(*ring.newest().unwrap(), 49);
    }

    #[test]
    fn cpu_percent_exactly_100_at_full_utilization() {
        // two ticks 1 second apart, counter advances host_cpus * 1e9 ns
        let mut ring = SampleRing::new(10);
        let first = derive_domain_sample(&ring, &counters(0, 0), &host(), 1_000, &all_metrics());
        ring.push(first);
        let s = derive_domain_sample(
            &ring,
            &counters(4_000_000_000, 0),
            &host(),
            2_000,
            &all_metrics(),
        );
        assert_eq!(s.cpu_percent, 100.0);
    }

    #[test]
    fn cpu_percent_clamps_to_zero_on_decreasing_counter() {
        let mut ring = SampleRing::new(10);
        let first = derive_domain_sample(&ring, &counters(5_000_000_000, 0), &host(), 1_000, &all_metrics());
        ring.push(first);
        let s = derive_domain_sample(
            &ring,
            &counters(1_000_000_000, 0),
            &host(),
            2_000,
            &all_metrics(),
        );
        assert_eq!(s.cpu_percent, 0.0);
        assert_eq!(s.cpu_time_delta, 0);
    }

    #[test]
    fn mem_percent_exact_half() {
        let ring = SampleRing::new(10);
        let s = derive_domain_sample(&ring, &counters(0, 500_000), &host(), 1_000, &all_metrics());
        assert_eq!(s.cur_mem_percent, 50.0);
    }

    #[test]
    fn moving_average_window_is_capped_at_five() {
        let mut ring = SampleRing::new(10);
        // 1 GHz-equivalent steady burn: +1e9 ns per 1s tick on a 4-cpu host
        for i in 0..8u64 {
            let s = derive_domain_sample(
                &ring,
                &counters(i * 1_000_000_000, 0),
                &host(),
                (i + 1) * 1_000,
                &all_metrics(),
            );
            ring.push(s);
        }
        let newest = ring.newest().unwrap();
        // window spans 4 seconds (samples 0..5), avg delta = 4e9/5
        assert_eq!(newest.cpu_time_moving_avg, 800_000_000);
        assert!((newest.cpu_moving_avg_percent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn moving_average_zero_elapsed_yields_zero_percent() {
        let mut ring = SampleRing::new(10);
        let first = derive_domain_sample(&ring, &counters(1_000_000, 0), &host(), 1_000, &all_metrics());
        ring.push(first);
        // same timestamp as the prior sample: elapsed window is zero
        let s = derive_domain_sample(
            &ring,
            &counters(2_000_000, 0),
            &host(),
            1_000,
            &all_metrics(),
        );
        assert_eq!(s.cpu_moving_avg_percent, 0.0);
        assert_eq!(s.cpu_time_moving_avg, 2_000_000);
    }

    #[test]
    fn rates_floor_negative_transients_to_zero() {
        let mut ring = SampleRing::new(10);
        let c0 = GuestCounters {
            disk_rd_kb: 10_000,
            net_rx_kb: 5_000,
            ..counters(0, 0)
        };
        let first = derive_domain_sample(&ring, &c0, &host(), 1_000, &all_metrics());
        ring.push(first);
        // counters reset (guest power-cycled)
        let c1 = GuestCounters {
            disk_rd_kb: 100,
            net_rx_kb: 50,
            ..counters(0, 0)
        };
        let s = derive_domain_sample(&ring, &c1, &host(), 2_000, &all_metrics());
        assert_eq!(s.disk_rd_rate_kb, 0.0);
        assert_eq!(s.net_rx_rate_kb, 0.0);
    }

    #[test]
    fn rates_compute_per_second() {
        let mut ring = SampleRing::new(10);
        let c0 = GuestCounters {
            disk_wr_kb: 1_000,
            net_tx_kb: 2_000,
            ..counters(0, 0)
        };
        let first = derive_domain_sample(&ring, &c0, &host(), 1_000, &all_metrics());
        ring.push(first);
        let c1 = GuestCounters {
            disk_wr_kb: 3_000,
            net_tx_kb: 2_500,
            ..counters(0, 0)
        };
        let s = derive_domain_sample(&ring, &c1, &host(), 3_000, &all_metrics());
        assert_eq!(s.disk_wr_rate_kb, 1_000.0);
        assert_eq!(s.net_tx_rate_kb, 250.0);
    }

    #[test]
    fn disabled_categories_derive_zero_without_touching_others() {
        let ring = SampleRing::new(10);
        let flags = MetricsConfig {
            enable_cpu: true,
            enable_mem: false,
            enable_disk: false,
            enable_net: true,
        };
        let c = GuestCounters {
            disk_rd_kb: 9_999,
            ..counters(1_000_000, 400_000)
        };
        let s = derive_domain_sample(&ring, &c, &host(), 1_000, &flags);
        assert_eq!(s.cur_mem_kb, 0);
        assert_eq!(s.cur_mem_percent, 0.0);
        assert_eq!(s.disk_rd_kb, 0);
        assert_eq!(s.cpu_time_abs, 1_000_000);
        assert_eq!(s.net_rx_kb, 0);
    }

    #[test]
    fn metric_vector_is_fixed_length_zero_padded_newest_first() {
        let mut ring: SampleRing<f64> = SampleRing::new(10);
        ring.push(1.0);
        ring.push(2.0);
        ring.push(3.0);
        let v = metric_vector(&ring, 10, |s| *s);
        assert_eq!(v.len(), 11);
        assert_eq!(&v[..3], &[3.0, 2.0, 1.0]);
        assert!(v[3..].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn connection_sample_clamps_shrinking_aggregate() {
        let mut ring = SampleRing::new(10);
        let first = derive_connection_sample(&ring, 800_000, 10_000_000_000, &host(), 1_000);
        ring.push(first);
        // a guest stopped; the aggregate counter shrank
        let s = derive_connection_sample(&ring, 400_000, 4_000_000_000, &host(), 2_000);
        assert_eq!(s.cpu_percent, 0.0);
        assert_eq!(s.mem_percent, 40.0);
    }
}
