use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use super::SelectedFile;

/// Allocator of short-lived local display handles (object urls).
///
/// Handles are a scarce resource, every `allocate` must be matched by
/// a `release`.
pub trait PreviewStore: Send + Sync {
    fn allocate(&self, file: &SelectedFile) -> PreviewHandle;
    fn release(&self, handle: &PreviewHandle);
}

impl<P: PreviewStore + ?Sized> PreviewStore for Arc<P> {
    fn allocate(&self, file: &SelectedFile) -> PreviewHandle {
        (**self).allocate(file)
    }

    fn release(&self, handle: &PreviewHandle) {
        (**self).release(handle)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PreviewHandle(String);

impl PreviewHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

/// Display-only projection of a selected file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePreview {
    pub handle: PreviewHandle,
    pub file: Uuid,
    pub name: String,
    pub size: u64,
}

pub fn build_preview(file: &SelectedFile, store: &dyn PreviewStore) -> FilePreview {
    FilePreview {
        handle: store.allocate(file),
        file: file.id,
        name: file.name.clone(),
        size: file.size,
    }
}

/// In-process preview store keeping the bytes behind each handle.
///
/// Tracks allocation and release counts, so leaks show up as a non-zero
/// [`MemoryPreviews::live`].
#[derive(Debug, Default)]
pub struct MemoryPreviews {
    handles: Mutex<HashMap<PreviewHandle, Arc<Vec<u8>>>>,
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl MemoryPreviews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: &PreviewHandle) -> Option<Arc<Vec<u8>>> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    pub fn live(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl PreviewStore for MemoryPreviews {
    fn allocate(&self, file: &SelectedFile) -> PreviewHandle {
        let handle = PreviewHandle(format!("blob:hearth/{}", Uuid::new_v4()));
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.clone(), Arc::new(file.bytes.clone()));
        self.allocated.fetch_add(1, Ordering::SeqCst);
        handle
    }

    fn release(&self, handle: &PreviewHandle) {
        let removed = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle);
        // releasing twice is harmless but only counts once
        if removed.is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
