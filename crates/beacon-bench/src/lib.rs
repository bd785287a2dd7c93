//! Shared pieces of the Beacon load tester.

use std::fmt::Write as _;
use std::ops::AddAssign;
use std::time::Duration;

/// One load-test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scenario {
    /// Publisher/subscriber pairs.
    pub clients: usize,
    /// Total messages to publish across all publishers.
    pub messages: usize,
    /// Upper bound on the run time.
    pub duration: Duration,
}

impl Scenario {
    #[must_use]
    pub const fn new(clients: usize, messages: usize, duration_secs: u64) -> Self {
        Self {
            clients,
            messages,
            duration: Duration::from_secs(duration_secs),
        }
    }

    /// Few clients with many messages, many clients with few, then a mix.
    #[must_use]
    pub fn defaults() -> [Scenario; 3] {
        [
            Scenario::new(5, 1000, 30),
            Scenario::new(20, 100, 30),
            Scenario::new(10, 500, 30),
        ]
    }

    /// Topic used by the `index`th publisher/subscriber pair.
    #[must_use]
    pub fn topic(index: usize) -> String {
        format!("load-{}", index)
    }

    /// Delay after the `n`th publish; cycles through 100..1000 ms.
    #[must_use]
    pub fn publish_delay(n: usize) -> Duration {
        Duration::from_millis(100 + (n as u64 * 397) % 900)
    }
}

/// Counters collected by one client or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub failed_connections: u64,
    pub send_latency_total: Duration,
}

impl LoadMetrics {
    /// Record one successful publish and how long the send took.
    pub fn record_send(&mut self, latency: Duration) {
        self.messages_sent += 1;
        self.send_latency_total += latency;
    }

    /// Mean time spent per send.
    #[must_use]
    pub fn mean_latency(&self) -> Duration {
        match u32::try_from(self.messages_sent) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.send_latency_total / n,
            Err(_) => Duration::from_secs_f64(
                self.send_latency_total.as_secs_f64() / self.messages_sent as f64,
            ),
        }
    }

    /// Render the report written after a run.
    #[must_use]
    pub fn render(&self, scenario: &Scenario) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Load test results ===");
        let _ = writeln!(
            out,
            "Clients: {} publishers and {} subscribers",
            scenario.clients, scenario.clients
        );
        let _ = writeln!(out, "Messages sent: {}", self.messages_sent);
        let _ = writeln!(out, "Messages received: {}", self.messages_received);
        let _ = writeln!(out, "Failed connections: {}", self.failed_connections);
        let _ = writeln!(
            out,
            "Mean send latency: {:.3}ms",
            self.mean_latency().as_secs_f64() * 1000.0
        );
        let _ = writeln!(out, "Duration limit: {}s", scenario.duration.as_secs());
        out
    }
}

impl AddAssign for LoadMetrics {
    fn add_assign(&mut self, other: Self) {
        self.messages_sent += other.messages_sent;
        self.messages_received += other.messages_received;
        self.failed_connections += other.failed_connections;
        self.send_latency_total += other.send_latency_total;
    }
}
