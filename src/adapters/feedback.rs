use crate::domain::ports::Feedback;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// 將演算法訊息轉為 tracing 日誌
///
/// 取消旗標可由其他執行緒 (例如 Ctrl-C 處理) 透過 `cancel_handle` 設定。
#[derive(Debug, Default)]
pub struct TracingFeedback {
    canceled: Arc<AtomicBool>,
    last_progress: AtomicU64,
}

impl TracingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.canceled)
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// 最後回報的進度 (百分比)
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.last_progress.load(Ordering::Relaxed))
    }
}

impl Feedback for TracingFeedback {
    fn push_info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn push_debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn push_warning(&self, message: &str) {
        tracing::warn!("⚠️ {}", message);
    }

    fn report_error(&self, message: &str, fatal: bool) {
        if fatal {
            tracing::error!("❌ {}", message);
        } else {
            tracing::error!("{}", message);
        }
    }

    fn set_progress(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        self.last_progress.store(percent.to_bits(), Ordering::Relaxed);
        tracing::debug!("Progress: {:.0}%", percent);
    }

    fn set_progress_text(&self, text: &str) {
        tracing::info!("⏳ {}", text);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}
