// Benchmark helpers module
// Synthetic metric sets shared by the evolution and fitness benchmarks

use aether_shared::Metric;
use chrono::{Duration, TimeZone, Utc};

/// `subjects` subjects with the four metrics the fitness evaluator reads,
/// spread over the last day so recency weighting does real work.
#[allow(dead_code)]
pub fn synthetic_metrics(subjects: usize) -> Vec<Metric> {
    let newest = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
    let mut metrics = Vec::with_capacity(subjects * 4);
    for i in 0..subjects {
        let subject = format!("bot-{i}");
        let at = newest - Duration::minutes((i % 1440) as i64);
        let f = (i % 17) as f64 / 17.0;
        metrics.push(Metric::new(&subject, "total_return", 0.1 + f, at));
        metrics.push(Metric::new(&subject, "win_rate", 0.4 + 0.5 * f, at));
        metrics.push(Metric::new(&subject, "max_drawdown", 0.3 - 0.2 * f, at));
        metrics.push(Metric::new(&subject, "volatility", 0.01 + 0.03 * f, at));
    }
    metrics
}
