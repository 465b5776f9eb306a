// file: src/pipeline/progress.rs
// description: progress tracking and statistics reporting for pipeline execution
// reference: uses indicatif for progress bars and tracks per-item outcomes

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub items_done: usize,
    pub items_failed: usize,
    pub items_skipped: usize,
    pub findings: usize,
    pub duration_secs: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items_finished(&self) -> usize {
        self.items_done + self.items_failed + self.items_skipped
    }

    pub fn items_per_second(&self) -> f64 {
        if self.duration_secs == 0 {
            return 0.0;
        }
        self.items_finished() as f64 / self.duration_secs as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.items_done + self.items_failed;
        if total == 0 {
            return 0.0;
        }
        (self.items_done as f64 / total as f64) * 100.0
    }
}

pub struct ProgressTracker {
    main_bar: ProgressBar,
    detail_bar: ProgressBar,
    items_done: Arc<AtomicUsize>,
    items_failed: Arc<AtomicUsize>,
    items_skipped: Arc<AtomicUsize>,
    findings: Arc<AtomicUsize>,
    start_time: Instant,
}

impl ProgressTracker {
    /// Draws nothing unless stderr is a terminal.
    pub fn with_color(total_items: usize, colored: bool) -> Self {
        let visible = std::io::stderr().is_terminal();
        Self::build(total_items, colored, visible)
    }

    pub fn hidden(total_items: usize) -> Self {
        Self::build(total_items, false, false)
    }

    fn build(total_items: usize, colored: bool, visible: bool) -> Self {
        let multi_progress = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let main_bar = create_progress_bar(&multi_progress, total_items as u64, colored);
        let detail_bar = create_detail_bar(&multi_progress);

        Self {
            main_bar,
            detail_bar,
            items_done: Arc::new(AtomicUsize::new(0)),
            items_failed: Arc::new(AtomicUsize::new(0)),
            items_skipped: Arc::new(AtomicUsize::new(0)),
            findings: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_done(&self) {
        self.items_done.fetch_add(1, Ordering::SeqCst);
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    pub fn inc_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::SeqCst);
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    pub fn inc_skipped(&self) {
        self.items_skipped.fetch_add(1, Ordering::SeqCst);
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    pub fn add_findings(&self, count: usize) {
        self.findings.fetch_add(count, Ordering::SeqCst);
        self.update_detail_bar();
    }

    pub fn set_message(&self, message: String) {
        self.main_bar.set_message(message);
    }

    pub fn finish(&self) {
        self.main_bar.finish_with_message("Processing complete");
        self.detail_bar.finish_and_clear();
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            items_done: self.items_done.load(Ordering::SeqCst),
            items_failed: self.items_failed.load(Ordering::SeqCst),
            items_skipped: self.items_skipped.load(Ordering::SeqCst),
            findings: self.findings.load(Ordering::SeqCst),
            duration_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn update_detail_bar(&self) {
        let message = format!(
            "Done: {} | Failed: {} | Skipped: {} | Findings: {}",
            self.items_done.load(Ordering::SeqCst),
            self.items_failed.load(Ordering::SeqCst),
            self.items_skipped.load(Ordering::SeqCst),
            self.findings.load(Ordering::SeqCst)
        );

        self.detail_bar.set_message(message);
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.finish();
    }
}

fn create_progress_bar(multi_progress: &MultiProgress, total: u64, colored: bool) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(total));
    let (template, chars) = if colored {
        (
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            "█▓▒░",
        )
    } else {
        (
            "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({eta}) {msg}",
            "=>-",
        )
    };

    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        bar.set_style(style.progress_chars(chars));
    }
    bar
}

fn create_detail_bar(multi_progress: &MultiProgress) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(0));
    if let Ok(style) = ProgressStyle::default_bar().template("{msg}") {
        bar.set_style(style);
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_stats_calculations() {
        let mut stats = PipelineStats::new();
        stats.items_done = 90;
        stats.items_failed = 10;
        stats.items_skipped = 20;
        stats.duration_secs = 10;

        assert_eq!(stats.items_finished(), 120);
        assert_eq!(stats.items_per_second(), 12.0);
        assert!((stats.success_rate() - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_pipeline_stats_zero_duration() {
        let stats = PipelineStats::new();
        assert_eq!(stats.items_per_second(), 0.0);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_progress_tracker_counts() {
        let tracker = ProgressTracker::hidden(10);

        tracker.inc_done();
        tracker.inc_failed();
        tracker.inc_failed();
        tracker.inc_skipped();
        tracker.add_findings(4);

        let stats = tracker.get_stats();
        assert_eq!(stats.items_done, 1);
        assert_eq!(stats.items_failed, 2);
        assert_eq!(stats.items_skipped, 1);
        assert_eq!(stats.findings, 4);
    }
}
