use crate::core::{Algorithm, AlgorithmOutput, Feedback};
use crate::utils::error::{BatchError, Result};
use crate::utils::monitor::SystemMonitor;

pub struct AlgorithmRunner<A: Algorithm> {
    algorithm: A,
    monitor: SystemMonitor,
}

impl<A: Algorithm> AlgorithmRunner<A> {
    pub fn new(algorithm: A) -> Self {
        Self::new_with_monitoring(algorithm, false)
    }

    pub fn new_with_monitoring(algorithm: A, monitor_enabled: bool) -> Self {
        Self {
            algorithm,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn run(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        tracing::info!("Starting {} ({})", self.algorithm.display_name(), self.algorithm.name());
        self.monitor.log_stats("Start");

        let result = self.algorithm.process(feedback);

        self.monitor.log_stats("End");
        self.monitor.log_final_stats();

        match &result {
            Ok(_) => tracing::info!(
                "{} finished in {:?}",
                self.algorithm.display_name(),
                self.monitor.elapsed()
            ),
            Err(BatchError::Canceled) => feedback.push_warning("Canceled by the user"),
            Err(e) => feedback.report_error(&e.to_string(), true),
        }

        result
    }
}
