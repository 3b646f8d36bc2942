//! Upload pipeline: selection, validation, compression, previews and the
//! batched multipart transfer.

mod compress;
mod preview;
mod validate;

pub use compress::{compress_if_needed, scaled_dimensions};
pub use preview::{build_preview, FilePreview, MemoryPreviews, PreviewHandle, PreviewStore};
pub use validate::{select_files, validate_file};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use mime::Mime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::UploadReceipt;
use crate::client::PhotoApi;
use crate::config;
use crate::error::{ErrorKind, Result, ValidationError, ValidationReason};
use crate::EntityId;

/// Locally chosen file pending upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedFile {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub content_type: Mime,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content_type: Mime, bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            size: bytes.len() as u64,
            content_type,
            bytes,
        }
    }

    /// Same as `new` with the type given as a string. Unparsable types end up
    /// as `application/octet-stream` and fail validation later.
    pub fn with_type(name: impl Into<String>, content_type: &str, bytes: Vec<u8>) -> Self {
        let content_type = content_type
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        Self::new(name, content_type, bytes)
    }

    /// Reads a file from disk, inferring its type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, mime_from_extension(path), bytes))
    }
}

fn mime_from_extension(path: &Path) -> Mime {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "png" => mime::IMAGE_PNG,
        "webp" => "image/webp".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM),
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

/// Outcome of offering files to a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection<T = SelectedFile> {
    pub accepted: Vec<T>,
    pub rejected: Vec<ValidationError>,
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self {
            accepted: vec![],
            rejected: vec![],
        }
    }
}

#[derive(Default)]
struct BatchState {
    files: Vec<SelectedFile>,
    previews: Vec<FilePreview>,
}

/// Files pending upload for one view, together with their previews.
///
/// The batch owns every preview handle it allocates and gives them back to
/// the store on removal, after a successful upload and on teardown (or drop).
pub struct UploadBatch<P: PreviewStore> {
    settings: config::Upload,
    store: P,
    state: Mutex<BatchState>,
    uploading: AtomicBool,
    cancel: CancellationToken,
}

impl<P: PreviewStore> UploadBatch<P> {
    pub fn new(settings: config::Upload, store: P) -> Self {
        Self {
            settings,
            store,
            state: Mutex::new(BatchState::default()),
            uploading: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the batch lifetime to an outer token, e.g. the owning view's.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &config::Upload {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.state().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.settings.max_files
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    pub fn previews(&self) -> Vec<FilePreview> {
        self.state().previews.clone()
    }

    pub fn file_ids(&self) -> Vec<Uuid> {
        self.state().files.iter().map(|f| f.id).collect()
    }

    /// Offers new files to the batch.
    ///
    /// Accepted files are compressed when above the threshold, get a preview
    /// and join the batch. If compressing any of them fails, none are added
    /// and the error is returned.
    pub async fn add(&self, candidates: Vec<SelectedFile>) -> Result<Selection<FilePreview>> {
        if self.cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled.into());
        }

        let selection = select_files(candidates, self.len(), &self.settings);

        let mut compressed = Vec::with_capacity(selection.accepted.len());
        for file in selection.accepted {
            let settings = self.settings.clone();
            let file = tokio::task::spawn_blocking(move || compress_if_needed(file, &settings))
                .await
                .map_err(|e| ErrorKind::Other(e.to_string()))??;
            compressed.push(file);
        }

        if self.cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled.into());
        }

        let mut rejected = selection.rejected;
        let previews = self.admit(compressed, &mut rejected);

        tracing::debug!(
            added = previews.len(),
            rejected = rejected.len(),
            total = self.len(),
            "files added to upload batch"
        );

        Ok(Selection {
            accepted: previews,
            rejected,
        })
    }

    /// Appends compressed files and allocates their previews, up to the
    /// capacity left at this point.
    fn admit(
        &self,
        mut compressed: Vec<SelectedFile>,
        rejected: &mut Vec<ValidationError>,
    ) -> Vec<FilePreview> {
        let mut state = self.state();
        // another add may have filled the batch while compressing
        let available = self.settings.max_files.saturating_sub(state.files.len());
        if available == 0 && !compressed.is_empty() {
            rejected.push(ValidationError::batch(ValidationReason::CapacityExceeded {
                max: self.settings.max_files,
            }));
        }
        compressed.truncate(available);

        let mut previews = Vec::with_capacity(compressed.len());
        for mut file in compressed {
            if state.files.iter().any(|f| f.id == file.id) {
                file.id = Uuid::new_v4();
            }
            let preview = build_preview(&file, &self.store);
            state.previews.push(preview.clone());
            state.files.push(file);
            previews.push(preview);
        }
        previews
    }

    /// Adds files like [`UploadBatch::add`], then sends the batch to `target`
    /// right away if `auto_upload` is configured and anything was accepted.
    ///
    /// The receipt is `None` when no upload was attempted. A failed upload
    /// leaves the added files in the batch.
    pub async fn add_and_upload<A: PhotoApi + ?Sized>(
        &self,
        candidates: Vec<SelectedFile>,
        api: &A,
        target: Option<EntityId>,
    ) -> Result<(Selection<FilePreview>, Option<UploadReceipt>)> {
        let selection = self.add(candidates).await?;
        if !self.settings.auto_upload || selection.accepted.is_empty() {
            return Ok((selection, None));
        }

        let receipt = self.upload(api, target).await?;
        Ok((selection, Some(receipt)))
    }

    /// Removes a file and releases its preview. Returns false if no file with
    /// the given id is in the batch.
    pub fn remove_file(&self, id: Uuid) -> bool {
        let mut state = self.state();
        let before = state.files.len();
        state.files.retain(|f| f.id != id);
        let removed = state.files.len() != before;

        let store = &self.store;
        state.previews.retain(|p| {
            if p.file == id {
                store.release(&p.handle);
                false
            } else {
                true
            }
        });

        removed
    }

    /// Drops every file and releases every preview.
    pub fn clear(&self) {
        let mut state = self.state();
        for preview in state.previews.drain(..) {
            self.store.release(&preview.handle);
        }
        state.files.clear();
    }

    /// Sends the whole batch to `target` as one request.
    ///
    /// Only one upload may be pending at a time, a concurrent call fails with
    /// [`ErrorKind::Busy`]. Uploaded files leave the batch on success and stay
    /// on failure so the user can retry.
    pub async fn upload<A: PhotoApi + ?Sized>(
        &self,
        api: &A,
        target: Option<EntityId>,
    ) -> Result<UploadReceipt> {
        let target = target.ok_or_else(|| {
            ValidationError::batch(ValidationReason::MissingTarget)
        })?;

        if self
            .uploading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ErrorKind::Busy.into());
        }
        let _guard = UploadGuard(&self.uploading);

        let files = self.state().files.clone();
        if files.is_empty() {
            return Err(ValidationError::batch(ValidationReason::EmptyBatch).into());
        }

        let result = api.upload_photos(target, &files).await;

        if self.cancel.is_cancelled() {
            // torn down while in flight, state is already released
            return result;
        }

        match &result {
            Ok(receipt) => {
                let mut state = self.state();
                state.files.retain(|f| !files.iter().any(|u| u.id == f.id));
                let store = &self.store;
                state.previews.retain(|p| {
                    if files.iter().any(|u| u.id == p.file) {
                        store.release(&p.handle);
                        false
                    } else {
                        true
                    }
                });
                tracing::info!(
                    target_entity = target,
                    files = files.len(),
                    partial = receipt.is_partial(),
                    "upload finished: {}",
                    receipt.message
                );
            }
            Err(e) => {
                tracing::warn!(target_entity = target, "upload failed: {}", e.kind);
            }
        }

        result
    }

    /// Releases everything the batch holds and abandons pending work.
    pub fn teardown(&self) {
        self.cancel.cancel();
        self.clear();
    }
}

impl<P: PreviewStore> Drop for UploadBatch<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Resets the in-flight flag however the upload ends.
struct UploadGuard<'a>(&'a AtomicBool);

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
