//! Request statistics for the bookie request path

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one operation
#[derive(Debug, Default)]
pub struct OpStats {
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub latency_sum_us: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl OpStats {
    pub fn record(&self, success: bool, latency_us: u64, bytes_in: u64, bytes_out: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_out, Ordering::Relaxed);
    }
}

/// Request statistics for a bookie
#[derive(Debug, Default)]
pub struct RequestStats {
    pub add_entry: OpStats,
    pub recovery_add_entry: OpStats,
    pub read_entry: OpStats,
    pub fence_read: OpStats,
    /// Adds refused because the bookie was read-only
    pub read_only_rejections: AtomicU64,
}

impl RequestStats {
    pub fn record_read_only_rejection(&self) {
        self.read_only_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    #[allow(clippy::cast_precision_loss)]
    pub fn export_prometheus(&self, bookie_id: &str) -> String {
        let mut output = String::with_capacity(2 * 1024);
        let ops = [
            ("AddEntry", &self.add_entry),
            ("RecoveryAddEntry", &self.recovery_add_entry),
            ("ReadEntry", &self.read_entry),
            ("FenceRead", &self.fence_read),
        ];

        let _ = writeln!(
            output,
            "# HELP ledgerio_bookie_requests_total Total bookie requests by operation and status"
        );
        let _ = writeln!(output, "# TYPE ledgerio_bookie_requests_total counter");
        for (op, stats) in &ops {
            let success = stats.requests_success.load(Ordering::Relaxed);
            let error = stats.requests_error.load(Ordering::Relaxed);
            let _ = writeln!(
                output,
                "ledgerio_bookie_requests_total{{bookie_id=\"{bookie_id}\",op=\"{op}\",status=\"success\"}} {success}"
            );
            let _ = writeln!(
                output,
                "ledgerio_bookie_requests_total{{bookie_id=\"{bookie_id}\",op=\"{op}\",status=\"error\"}} {error}"
            );
        }

        let _ = writeln!(
            output,
            "# HELP ledgerio_bookie_latency_seconds_sum Sum of bookie request latencies"
        );
        let _ = writeln!(output, "# TYPE ledgerio_bookie_latency_seconds_sum counter");
        for (op, stats) in &ops {
            let sum_us = stats.latency_sum_us.load(Ordering::Relaxed);
            let _ = writeln!(
                output,
                "ledgerio_bookie_latency_seconds_sum{{bookie_id=\"{bookie_id}\",op=\"{op}\"}} {}",
                sum_us as f64 / 1_000_000.0
            );
        }

        let _ = writeln!(
            output,
            "# HELP ledgerio_bookie_bytes_received_total Total entry bytes received"
        );
        let _ = writeln!(output, "# TYPE ledgerio_bookie_bytes_received_total counter");
        for (op, stats) in &ops {
            let bytes = stats.bytes_received.load(Ordering::Relaxed);
            if bytes > 0 {
                let _ = writeln!(
                    output,
                    "ledgerio_bookie_bytes_received_total{{bookie_id=\"{bookie_id}\",op=\"{op}\"}} {bytes}"
                );
            }
        }

        let _ = writeln!(
            output,
            "# HELP ledgerio_bookie_bytes_sent_total Total entry bytes sent"
        );
        let _ = writeln!(output, "# TYPE ledgerio_bookie_bytes_sent_total counter");
        for (op, stats) in &ops {
            let bytes = stats.bytes_sent.load(Ordering::Relaxed);
            if bytes > 0 {
                let _ = writeln!(
                    output,
                    "ledgerio_bookie_bytes_sent_total{{bookie_id=\"{bookie_id}\",op=\"{op}\"}} {bytes}"
                );
            }
        }

        let _ = writeln!(
            output,
            "# HELP ledgerio_bookie_read_only_rejections_total Adds refused while read-only"
        );
        let _ = writeln!(output, "# TYPE ledgerio_bookie_read_only_rejections_total counter");
        let _ = writeln!(
            output,
            "ledgerio_bookie_read_only_rejections_total{{bookie_id=\"{bookie_id}\"}} {}",
            self.read_only_rejections.load(Ordering::Relaxed)
        );

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_export() {
        let stats = RequestStats::default();
        stats.add_entry.record(true, 1_500, 64, 0);
        stats.add_entry.record(false, 500, 32, 0);
        stats.read_entry.record(true, 100, 0, 64);
        stats.record_read_only_rejection();

        assert_eq!(stats.add_entry.requests_total.load(Ordering::Relaxed), 2);
        assert_eq!(stats.add_entry.requests_error.load(Ordering::Relaxed), 1);

        let text = stats.export_prometheus("bookie-1");
        assert!(text.contains(
            "ledgerio_bookie_requests_total{bookie_id=\"bookie-1\",op=\"AddEntry\",status=\"success\"} 1"
        ));
        assert!(text.contains(
            "ledgerio_bookie_latency_seconds_sum{bookie_id=\"bookie-1\",op=\"AddEntry\"} 0.002"
        ));
        assert!(text.contains(
            "ledgerio_bookie_bytes_sent_total{bookie_id=\"bookie-1\",op=\"ReadEntry\"} 64"
        ));
        assert!(!text.contains(
            "ledgerio_bookie_bytes_sent_total{bookie_id=\"bookie-1\",op=\"AddEntry\"}"
        ));
        assert!(
            text.contains("ledgerio_bookie_read_only_rejections_total{bookie_id=\"bookie-1\"} 1")
        );
    }
}
