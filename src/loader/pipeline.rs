//! Decode worker with a bounded hand-off
//!
//! The worker decodes ahead of the consumer by at most `max_in_flight`
//! batches. When the channel is full the worker blocks in `send`, so a slow
//! writer holds memory at roughly `max_in_flight * batch_size` rows no matter
//! how large the input is.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};

use crate::batch::Batch;
use crate::observability::{log_event_with_fields, Event, MetricsSink};

use super::decoder::BatchDecoder;
use super::errors::{LoaderError, LoaderResult};

pub struct DecodePipeline {
    receiver: Option<Receiver<LoaderResult<Batch>>>,
    worker: Option<JoinHandle<()>>,
}

impl DecodePipeline {
    pub fn spawn(
        mut decoder: Box<dyn BatchDecoder>,
        batch_size: usize,
        max_in_flight: usize,
        metrics: Arc<dyn MetricsSink>,
    ) -> LoaderResult<Self> {
        let (sender, receiver) = bounded(max_in_flight.max(1));
        let batch_size = batch_size.max(1);

        let worker = thread::Builder::new()
            .name("tickdb-decode".to_string())
            .spawn(move || loop {
                match decoder.decode_batch(batch_size) {
                    Ok(Some(batch)) => {
                        metrics.batch_decoded();
                        if sender.send(Ok(batch)).is_err() {
                            // Consumer hung up
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        log_event_with_fields(
                            Event::DecodeWorkerFailed,
                            &[("code", err.code().code()), ("error", err.message())],
                        );
                        let _ = sender.send(Err(err));
                        return;
                    }
                }
            })
            .map_err(|e| LoaderError::worker_failed(format!("could not start worker: {}", e)))?;

        Ok(Self {
            receiver: Some(receiver),
            worker: Some(worker),
        })
    }

    fn join_worker(&mut self) -> Option<LoaderError> {
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(()) => None,
            Err(_) => Some(LoaderError::worker_failed("decode worker panicked")),
        }
    }
}

impl Iterator for DecodePipeline {
    type Item = LoaderResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv() {
            Ok(item) => Some(item),
            Err(_) => {
                // Worker finished and the channel is drained
                self.receiver = None;
                self.join_worker().map(Err)
            }
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        // Closing the receiver unblocks a worker waiting in send
        self.receiver.take();
        let _ = self.join_worker();
    }
}
