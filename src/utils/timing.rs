use std::time::{Duration, Instant};

use tracing::debug;

pub struct ScopedExecutionTimer<'a> {
    task_name: &'a str,
    started_at: Instant,
}

impl<'a> ScopedExecutionTimer<'a> {
    pub fn new(task_name: &'a str) -> Self {
        Self {
            task_name,
            started_at: Instant::now(),
        }
    }
}

impl Drop for ScopedExecutionTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.started_at.elapsed();
        debug!(
            task = self.task_name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "task '{}' finished in {}",
            self.task_name,
            format_duration_human_friendly(elapsed)
        );
    }
}

pub fn measure_execution<T, F>(task_name: &str, task: F) -> T
where
    F: FnOnce() -> T,
{
    let _timer = ScopedExecutionTimer::new(task_name);
    task()
}

fn format_duration_human_friendly(duration: Duration) -> String {
    let total_ms = duration.as_secs_f64() * 1000.0;
    if total_ms < 1_000.0 {
        return format!("{total_ms:.2} ms");
    }

    let total_seconds = total_ms / 1_000.0;
    if total_seconds < 60.0 {
        return format!("{total_seconds:.2} s");
    }

    let minutes = (total_seconds / 60.0).floor();
    format!("{minutes:.0}m {:.2}s", total_seconds - minutes * 60.0)
}
