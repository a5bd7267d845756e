//! A bounded pool of workers cataloging archives.
//!
//! Submissions are queued on a bounded channel, so a full queue holds back
//! further submitters. Every worker builds, verifies and persists one archive
//! at a time, with its own [ArchiveProcessor], so concurrent archives never
//! share deduplication state.
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blobservice::BlobService;
use crate::catalogservice::{CatalogService, PartId};
use crate::config::ControllerConfig;
use crate::extract::Extractor;
use crate::processor::{self, ArchiveProcessor};
use crate::tree::{self, calculate_verification_codes, ArchiveIdentity, VerificationCode};
use crate::{Error, Sha256Digest};

/// An archive on local disk waiting to be cataloged.
#[derive(Clone, Debug)]
pub struct ArchiveUpload {
    pub path: PathBuf,
    /// The name to record, defaults to the file name of `path`.
    pub name: Option<String>,
}

impl ArchiveUpload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| tree::file_name_lossy(&self.path))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The archive was processed and its tree persisted.
    Cataloged {
        part_id: PartId,
        verification_code: VerificationCode,
    },
    /// The same bytes were cataloged before, nothing was processed.
    AlreadyCataloged { part_id: PartId },
    /// The upload is not an archive, its contents were stored as a blob.
    PlainFile { sha256: Sha256Digest },
}

struct WorkItem {
    upload: ArchiveUpload,
    identity: ArchiveIdentity,
    reply: oneshot::Sender<Result<ProcessOutcome, Error>>,
}

/// Everything a worker needs to run one [WorkItem].
struct Collaborators {
    extractor: Arc<dyn Extractor>,
    blob_service: Arc<dyn BlobService>,
    catalog: Arc<dyn CatalogService>,
    scratch_dir: PathBuf,
}

impl Collaborators {
    async fn run(
        &self,
        upload: ArchiveUpload,
        identity: ArchiveIdentity,
    ) -> Result<ProcessOutcome, Error> {
        let mut processor = ArchiveProcessor::new(self.extractor.clone(), &self.scratch_dir)
            .with_blob_service(self.blob_service.clone());

        let root = match processor.process_archive(&upload.path).await {
            Ok(root) => root,
            Err(Error::ExtractionFailed { reason, .. }) => {
                debug!(%reason, "not an archive, storing it as a plain file");
                let sha256 = identity.digests.sha256;
                let mut file = tokio::fs::File::open(&upload.path)
                    .await
                    .map_err(|e| Error::io(&upload.path, e))?;
                self.blob_service
                    .store(&sha256, &mut file)
                    .await
                    .map_err(|e| Error::StorageError(e.to_string()))?;
                return Ok(ProcessOutcome::PlainFile { sha256 });
            }
            Err(e) => return Err(e),
        };

        Span::current().pb_set_message("Calculating verification codes");
        root.write().set_name(upload.name());
        calculate_verification_codes(&root)?;
        let verification_code = root
            .read()
            .verification_code_two()
            .cloned()
            .ok_or_else(|| Error::MissingDigest(format!("verification code of {}", upload.name())))?;

        Span::current().pb_set_message("Persisting");
        let part_id = self.catalog.put_tree(&root).await?;
        info!(%part_id, %verification_code, "cataloged archive");

        Ok(ProcessOutcome::Cataloged {
            part_id,
            verification_code,
        })
    }
}

async fn worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    collaborators: Arc<Collaborators>,
) {
    loop {
        // Only hold the lock while waiting, so another worker can pick up the
        // next item while this one runs.
        let item = rx.lock().await.recv().await;
        let Some(WorkItem {
            upload,
            identity,
            reply,
        }) = item
        else {
            break;
        };

        let span = info_span!(
            "process_archive",
            worker = id,
            path = %upload.path.display(),
            indicatif.pb_show = 1
        );
        span.pb_set_message(&format!("Processing {}", upload.name()));

        let collaborators = collaborators.clone();
        let result = tokio::spawn(
            async move { collaborators.run(upload, identity).await }.instrument(span),
        )
        .await
        .map_err(Error::from)
        .and_then(|r| r);

        if let Err(Error::WorkerPanicked(msg)) = &result {
            error!(worker = id, %msg, "archive task failed");
        }

        // The submitter may have stopped waiting.
        let _ = reply.send(result);
    }

    debug!(worker = id, "worker exiting");
}

pub struct ArchiveController {
    tx: RwLock<Option<mpsc::Sender<WorkItem>>>,
    catalog: Arc<dyn CatalogService>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ArchiveController {
    /// Starts the worker pool. Must be called from within a tokio runtime.
    pub fn spawn(
        config: &ControllerConfig,
        extractor: Arc<dyn Extractor>,
        blob_service: Arc<dyn BlobService>,
        catalog: Arc<dyn CatalogService>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));
        let collaborators = Arc::new(Collaborators {
            extractor,
            blob_service,
            catalog: catalog.clone(),
            scratch_dir: config.scratch_dir.clone(),
        });

        let workers = (0..config.workers())
            .map(|id| tokio::spawn(worker(id, rx.clone(), collaborators.clone())))
            .collect();

        info!(
            workers = config.workers(),
            queue_capacity = config.queue_capacity(),
            "started archive controller"
        );

        Self {
            tx: RwLock::new(Some(tx)),
            catalog,
            workers: Mutex::new(workers),
        }
    }

    /// Catalogs the archive at `upload.path`, waiting until a worker has
    /// finished with it.
    ///
    /// Archives with the same contents as an already cataloged one are only
    /// recorded under the new name.
    #[instrument(skip_all, fields(path = %upload.path.display()), err)]
    pub async fn process(&self, upload: ArchiveUpload) -> Result<ProcessOutcome, Error> {
        let identity = match processor::identify(&upload.path).await {
            Err(Error::Io { path, source }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()))
            }
            r => r?,
        };

        if let Some(part_id) = self
            .catalog
            .sync_archive(&upload.name(), &identity)
            .await?
        {
            debug!(%part_id, "already cataloged");
            return Ok(ProcessOutcome::AlreadyCataloged { part_id });
        }

        let tx = self.tx.read().clone().ok_or(Error::ControllerClosed)?;
        let (reply, rx) = oneshot::channel();
        tx.send(WorkItem {
            upload,
            identity,
            reply,
        })
        .await
        .map_err(|_| Error::ControllerClosed)?;

        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn shutdown(&self) {
        drop(self.tx.write().take());

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                error!(err = %e, "worker failed");
            }
        }
        debug!("archive controller stopped");
    }
}
