use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::capture::{
    BodyLimits, CaptureInsertResult, CaptureRecorder, CaptureRequest, CaptureResponse,
    CaptureStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureWorkerConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_queue_size: usize,
}

impl Default for CaptureWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            flush_interval_ms: 200,
            max_queue_size: 50_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub request: CaptureRequest,
    pub response: Option<CaptureResponse>,
}

/// Sending side of the writer thread. Cheap to clone; the thread exits
/// once every handle is dropped and the last batch is written.
#[derive(Debug, Clone)]
pub struct CaptureWorkerHandle {
    sender: Sender<CaptureEvent>,
}

impl CaptureWorkerHandle {
    /// Blocks while the queue is full.
    pub fn send(&self, event: CaptureEvent) -> Result<(), String> {
        self.sender.send(event).map_err(|err| err.to_string())
    }

    /// Fails instead of blocking when the queue is full.
    pub fn try_send(&self, event: CaptureEvent) -> Result<(), String> {
        self.sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => "capture queue is full".to_string(),
            TrySendError::Disconnected(_) => "capture worker has stopped".to_string(),
        })
    }
}

/// What the writer thread did over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureWorkerStats {
    pub requests_written: usize,
    pub responses_written: usize,
    /// Records the store rejected. A rejected request also loses its
    /// response.
    pub failed_writes: usize,
}

/// Reports how many events are still queued. Holding one does not keep the
/// writer thread alive.
#[derive(Debug, Clone)]
pub struct CaptureBacklog {
    receiver: Receiver<CaptureEvent>,
}

impl CaptureBacklog {
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

pub struct CaptureWorker {
    handle: CaptureWorkerHandle,
    backlog: CaptureBacklog,
    thread: JoinHandle<CaptureWorkerStats>,
}

impl CaptureWorker {
    pub fn handle(&self) -> CaptureWorkerHandle {
        self.handle.clone()
    }

    pub fn backlog(&self) -> CaptureBacklog {
        self.backlog.clone()
    }

    /// Drops this handle and waits for the thread to write what is queued.
    /// Returns once every other handle is gone too.
    pub fn shutdown(self) -> Result<CaptureWorkerStats, String> {
        drop(self.handle);
        self.thread
            .join()
            .map_err(|_| "capture worker panicked".to_string())
    }
}

pub fn spawn_capture_worker(
    store: Box<dyn CaptureStore>,
    limits: BodyLimits,
    config: CaptureWorkerConfig,
) -> CaptureWorker {
    let (sender, receiver) = bounded(config.max_queue_size.max(1));
    let backlog = CaptureBacklog {
        receiver: receiver.clone(),
    };
    let recorder = CaptureRecorder::new(store, limits);

    let thread = std::thread::spawn(move || worker_loop(receiver, recorder, config));

    CaptureWorker {
        handle: CaptureWorkerHandle { sender },
        backlog,
        thread,
    }
}

fn worker_loop(
    receiver: Receiver<CaptureEvent>,
    recorder: CaptureRecorder,
    config: CaptureWorkerConfig,
) -> CaptureWorkerStats {
    let mut batch = Vec::with_capacity(config.batch_size);
    let mut stats = CaptureWorkerStats::default();
    let mut last_flush = Instant::now();
    let interval = Duration::from_millis(config.flush_interval_ms);

    loop {
        match receiver.recv_timeout(interval) {
            Ok(event) => {
                batch.push(event);
                if batch.len() >= config.batch_size || last_flush.elapsed() >= interval {
                    flush_batch(&recorder, &mut batch, &mut stats);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() {
                    flush_batch(&recorder, &mut batch, &mut stats);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush_batch(&recorder, &mut batch, &mut stats);
                return stats;
            }
        }
    }
}

fn flush_batch(
    recorder: &CaptureRecorder,
    batch: &mut Vec<CaptureEvent>,
    stats: &mut CaptureWorkerStats,
) {
    for event in batch.drain(..) {
        let request_id = match recorder.record_request(event.request) {
            Ok(CaptureInsertResult { request_id }) => request_id,
            Err(_) => {
                stats.failed_writes += 1 + usize::from(event.response.is_some());
                continue;
            }
        };
        stats.requests_written += 1;

        if let Some(mut response) = event.response {
            response.capture_request_id = request_id;
            match recorder.record_response(response) {
                Ok(()) => stats.responses_written += 1,
                Err(_) => stats.failed_writes += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{CaptureEvent, CaptureWorkerConfig, CaptureWorkerStats, spawn_capture_worker};
    use crate::capture::{
        BodyLimits, CaptureInsertResult, CaptureRequest, CaptureResponse, CaptureStore,
    };
    use crate::capture_test::{sample_request, sample_response};

    #[derive(Default)]
    struct Recorded {
        requests: Mutex<Vec<CaptureRequest>>,
        responses: Mutex<Vec<CaptureResponse>>,
    }

    impl CaptureStore for Arc<Recorded> {
        fn insert_request(&self, request: CaptureRequest) -> Result<CaptureInsertResult, String> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            Ok(CaptureInsertResult {
                request_id: requests.len() as i64,
            })
        }

        fn insert_response(&self, response: CaptureResponse) -> Result<(), String> {
            self.responses.lock().unwrap().push(response);
            Ok(())
        }
    }

    #[test]
    fn flushes_pending_batch_on_shutdown() {
        let recorded = Arc::new(Recorded::default());
        let worker = spawn_capture_worker(
            Box::new(recorded.clone()),
            BodyLimits::default(),
            CaptureWorkerConfig {
                batch_size: 100,
                flush_interval_ms: 60_000,
                max_queue_size: 10,
            },
        );

        let handle = worker.handle();
        for _ in 0..3 {
            handle
                .send(CaptureEvent {
                    request: sample_request(),
                    response: Some(sample_response(0)),
                })
                .unwrap();
        }
        drop(handle);
        let stats = worker.shutdown().unwrap();

        assert_eq!(
            stats,
            CaptureWorkerStats {
                requests_written: 3,
                responses_written: 3,
                failed_writes: 0,
            }
        );
        assert_eq!(recorded.requests.lock().unwrap().len(), 3);
        let ids: Vec<i64> = recorded
            .responses
            .lock()
            .unwrap()
            .iter()
            .map(|response| response.capture_request_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn try_send_reports_stopped_worker() {
        let recorded = Arc::new(Recorded::default());
        let worker = spawn_capture_worker(
            Box::new(recorded),
            BodyLimits::default(),
            CaptureWorkerConfig::default(),
        );
        let handle = worker.handle();
        let (sender, receiver) = crossbeam_channel::bounded::<CaptureEvent>(1);
        drop(receiver);
        let stopped = super::CaptureWorkerHandle { sender };

        assert!(stopped.try_send(CaptureEvent {
            request: sample_request(),
            response: None,
        })
        .is_err());
        drop(handle);
        worker.shutdown().unwrap();
    }

    /// Rejects every request whose host is `reject.test` and every response.
    struct Picky;

    impl CaptureStore for Picky {
        fn insert_request(&self, request: CaptureRequest) -> Result<CaptureInsertResult, String> {
            if request.host == "reject.test" {
                return Err("constraint failed".to_string());
            }
            Ok(CaptureInsertResult { request_id: 1 })
        }

        fn insert_response(&self, _response: CaptureResponse) -> Result<(), String> {
            Err("disk full".to_string())
        }
    }

    #[test]
    fn counts_rejected_writes() {
        let worker = spawn_capture_worker(
            Box::new(Picky),
            BodyLimits::default(),
            CaptureWorkerConfig::default(),
        );
        let handle = worker.handle();

        let mut rejected = sample_request();
        rejected.host = "reject.test".to_string();
        handle
            .send(CaptureEvent {
                request: rejected,
                response: Some(sample_response(0)),
            })
            .unwrap();
        handle
            .send(CaptureEvent {
                request: sample_request(),
                response: Some(sample_response(0)),
            })
            .unwrap();
        handle
            .send(CaptureEvent {
                request: sample_request(),
                response: None,
            })
            .unwrap();
        drop(handle);

        let stats = worker.shutdown().unwrap();
        assert_eq!(stats.requests_written, 2);
        assert_eq!(stats.responses_written, 0);
        assert_eq!(stats.failed_writes, 3);
    }

    #[test]
    fn backlog_does_not_keep_worker_alive() {
        let recorded = Arc::new(Recorded::default());
        let worker = spawn_capture_worker(
            Box::new(recorded),
            BodyLimits::default(),
            CaptureWorkerConfig::default(),
        );
        let backlog = worker.backlog();

        worker.shutdown().unwrap();
        assert!(backlog.is_empty());
    }
}
