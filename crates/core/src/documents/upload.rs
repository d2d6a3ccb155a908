use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::documents::tracker::{
    DocumentError, DocumentRequirementTracker, FileId, UploadStatus, UploadedFile,
};
use crate::ports::{DocumentUploader, StoredDocument};

const EVENT_BUFFER: usize = 32;
const PROGRESS_BUFFER: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadEvent {
    Progress(u8),
    Completed(StoredDocument),
    Failed(String),
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Runs one file upload on the runtime and reports it as a stream of [`UploadEvent`]s.
pub struct UploadTask;

impl UploadTask {
    pub fn spawn(uploader: Arc<dyn DocumentUploader>, file: UploadedFile) -> UploadHandle {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let file_id = file.id.clone();

        let task = tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_BUFFER);
            let upload = uploader.upload_file(&file, &file.document_type, progress_tx);
            tokio::pin!(upload);

            let outcome = loop {
                tokio::select! {
                    result = &mut upload => break result,
                    Some(percent) = progress_rx.recv() => {
                        if events_tx.send(UploadEvent::Progress(percent)).await.is_err() {
                            return;
                        }
                    }
                }
            };

            while let Ok(percent) = progress_rx.try_recv() {
                if events_tx.send(UploadEvent::Progress(percent)).await.is_err() {
                    return;
                }
            }

            let terminal = match outcome.map(|envelope| envelope.into_result()) {
                Ok(Ok(Some(stored))) => UploadEvent::Completed(stored),
                Ok(Ok(None)) => {
                    UploadEvent::Failed("upload finished without a stored document".to_string())
                }
                Ok(Err(message)) => UploadEvent::Failed(message),
                Err(error) => UploadEvent::Failed(error.to_string()),
            };
            let _ = events_tx.send(terminal).await;
        });

        UploadHandle { file_id, events: events_rx, task: Some(task), cancelled: false }
    }
}

/// Owner side of a running upload. Dropping the handle aborts the upload.
pub struct UploadHandle {
    file_id: FileId,
    events: mpsc::Receiver<UploadEvent>,
    task: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl UploadHandle {
    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Next event from the transport; `None` once the upload finished or was cancelled.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        if self.cancelled {
            return None;
        }
        self.events.recv().await
    }

    /// Aborts the transport task. Buffered events are discarded. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(
                event_name = "kyc.documents.upload_cancelled",
                file_id = %self.file_id,
                "upload task aborted"
            );
        }
        self.cancelled = true;
        self.events.close();
    }

    /// Applies every event to the tracker until the upload reaches a terminal state.
    ///
    /// A stream that closes without a terminal event (cancelled, aborted or panicked
    /// transport) marks the file failed.
    pub async fn drive(
        mut self,
        tracker: &mut DocumentRequirementTracker,
    ) -> Result<UploadStatus, DocumentError> {
        let mut finished = false;
        while let Some(event) = self.next_event().await {
            let terminal = event.is_terminal();
            tracker.apply_upload_event(&self.file_id, event)?;
            if terminal {
                finished = true;
                break;
            }
        }

        if !finished {
            let reason = self.abandonment_reason().await;
            if tracker.file(&self.file_id).is_some_and(|file| !file.status.is_terminal()) {
                tracker.mark_upload_failed(&self.file_id, reason)?;
            }
        }

        tracker
            .file(&self.file_id)
            .map(|file| file.status)
            .ok_or_else(|| DocumentError::UnknownFile(self.file_id.clone()))
    }
}

impl UploadHandle {
    async fn abandonment_reason(&mut self) -> String {
        let Some(task) = self.task.take() else {
            return "cancelled".to_string();
        };
        match task.await {
            Ok(()) => "upload task ended without a result".to_string(),
            Err(error) if error.is_panic() => {
                "upload task panicked before reporting a result".to_string()
            }
            Err(_) => "upload task was aborted before reporting a result".to_string(),
        }
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
