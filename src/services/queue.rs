use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Local;
use uuid::Uuid;

use crate::domain::operation::{LogLevel, Operation, OperationLog, OperationStatus};

/// The queue capability the core publishes into. Scheduling, persistence
/// and subscriber fan-out belong to whoever implements this.
pub trait Queue: Send + Sync {
    fn enqueue(&self, operation: Operation) -> Uuid;
    fn get(&self, id: &Uuid) -> Option<Operation>;
    fn update_status(&self, id: &Uuid, status: OperationStatus);
    fn update_progress(&self, id: &Uuid, progress: u8);
    fn add_log(&self, id: &Uuid, level: LogLevel, message: String);
}

/// Queue implementation backing the CLI and the tests. Keeps everything in
/// one process; progress is clamped monotone so subscribers never see it
/// move backwards.
pub struct InMemoryQueue {
    operations: Mutex<HashMap<Uuid, Operation>>
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(HashMap::new())
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue for InMemoryQueue {

    fn enqueue(&self, operation: Operation) -> Uuid {
        let id = operation.id;
        if let Ok(mut guard) = self.operations.lock() {
            guard.insert(id, operation);
        }
        id
    }

    fn get(&self, id: &Uuid) -> Option<Operation> {
        self.operations.lock().ok()?.get(id).cloned()
    }

    fn update_status(&self, id: &Uuid, status: OperationStatus) {
        if let Ok(mut guard) = self.operations.lock() {
            if let Some(operation) = guard.get_mut(id) {
                operation.status = status;
            }
        }
    }

    fn update_progress(&self, id: &Uuid, progress: u8) {
        if let Ok(mut guard) = self.operations.lock() {
            if let Some(operation) = guard.get_mut(id) {
                // Monotone non-decreasing, capped at done.
                operation.progress = operation.progress.max(progress.min(100));
            }
        }
    }

    fn add_log(&self, id: &Uuid, level: LogLevel, message: String) {
        if let Ok(mut guard) = self.operations.lock() {
            if let Some(operation) = guard.get_mut(id) {
                operation.logs.push(OperationLog {
                    level,
                    message,
                    timestamp: Local::now().naive_local()
                });
            }
        }
    }
}

/// The importer's and organizer's handle into the queue: one operation id,
/// publish-only.
#[derive(Clone)]
pub struct OperationReporter {
    queue: Arc<dyn Queue>,
    operation_id: Uuid
}

impl OperationReporter {

    pub fn new(queue: Arc<dyn Queue>, operation_id: Uuid) -> Self {
        Self { queue, operation_id }
    }

    /// Enqueues a fresh operation and returns its reporter.
    pub fn begin(queue: Arc<dyn Queue>, op_type: &str, description: &str) -> Self {
        let operation = Operation::new(op_type, description, Local::now().naive_local());
        let operation_id = queue.enqueue(operation);
        queue.update_status(&operation_id, OperationStatus::Running);

        Self { queue, operation_id }
    }

    pub fn operation_id(&self) -> &Uuid {
        &self.operation_id
    }

    pub fn update_status(&self, status: OperationStatus) {
        self.queue.update_status(&self.operation_id, status);
    }

    pub fn update_progress(&self, progress: u8) {
        self.queue.update_progress(&self.operation_id, progress);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.queue.add_log(&self.operation_id, LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.queue.add_log(&self.operation_id, LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.queue.add_log(&self.operation_id, LogLevel::Error, message.into());
    }

    /// Cancellation is user-initiated through the queue; long-running jobs
    /// poll this between units of work.
    pub fn is_cancelled(&self) -> bool {
        self.queue
            .get(&self.operation_id)
            .map(|operation| operation.status == OperationStatus::Cancelled)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> (Arc<InMemoryQueue>, OperationReporter) {
        let queue = Arc::new(InMemoryQueue::new());
        let reporter = OperationReporter::begin(queue.clone(), "import", "test run");
        (queue, reporter)
    }

    #[test]
    fn test_begin_marks_running() {
        let (queue, reporter) = reporter();

        let operation = queue.get(reporter.operation_id()).unwrap();
        assert_eq!(operation.status, OperationStatus::Running);
        assert_eq!(operation.op_type, "import");
    }

    #[test]
    fn test_progress_is_monotone() {
        let (queue, reporter) = reporter();

        reporter.update_progress(40);
        reporter.update_progress(20);
        reporter.update_progress(110);

        let operation = queue.get(reporter.operation_id()).unwrap();
        assert_eq!(operation.progress, 100);
    }

    #[test]
    fn test_progress_never_decreases() {
        let (queue, reporter) = reporter();

        reporter.update_progress(60);
        reporter.update_progress(30);

        assert_eq!(queue.get(reporter.operation_id()).unwrap().progress, 60);
    }

    #[test]
    fn test_logs_accumulate() {
        let (queue, reporter) = reporter();

        reporter.info("starting");
        reporter.warn("skipping a duplicate");

        let operation = queue.get(reporter.operation_id()).unwrap();
        assert_eq!(operation.logs.len(), 2);
        assert_eq!(operation.logs[0].level, LogLevel::Info);
        assert_eq!(operation.logs[1].level, LogLevel::Warn);
    }

    #[test]
    fn test_cancellation_is_visible() {
        let (queue, reporter) = reporter();

        assert!(!reporter.is_cancelled());
        queue.update_status(reporter.operation_id(), OperationStatus::Cancelled);
        assert!(reporter.is_cancelled());
    }
}
