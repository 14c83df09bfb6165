// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub(crate) type Job = BoxFuture<'static, ()>;

/// Runs listener jobs one after another on a dedicated task, so slow
/// listeners do not hold up the read loop.
///
/// The task is spawned on first use and ends once the worker is dropped
/// and its queue drained.
#[derive(Default)]
pub(crate) struct DispatchWorker {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl DispatchWorker {
    /// Queue `job` behind everything submitted before.
    ///
    /// Gives the job back if there is no runtime to spawn the worker on.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if tx.as_ref().map_or(true, |tx| tx.is_closed()) {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                return Err(job);
            };
            let (new_tx, mut rx) = mpsc::unbounded_channel::<Job>();
            handle.spawn(async move {
                while let Some(job) = rx.recv().await {
                    job.await;
                }
                log::trace!("dispatch worker finished");
            });
            *tx = Some(new_tx);
        }
        match tx.as_ref() {
            Some(sender) => sender.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn jobs_run_in_order() {
        let worker = DispatchWorker::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            worker
                .submit(
                    async move {
                        // Later jobs must not overtake a job which yields.
                        tokio::task::yield_now().await;
                        seen.lock().unwrap().push(i);
                    }
                    .boxed(),
                )
                .ok()
                .unwrap();
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        worker
            .submit(
                async move {
                    let _ = tx.send(());
                }
                .boxed(),
            )
            .ok()
            .unwrap();
        rx.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn no_runtime_gives_job_back() {
        let worker = DispatchWorker::default();
        assert!(worker.submit(async {}.boxed()).is_err());
    }
}
