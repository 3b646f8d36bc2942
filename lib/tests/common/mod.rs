#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use hearth::api::{PhotoDescriptor, PhotoDto, PhotoPayload, UploadReceipt};
use hearth::{EntityId, PhotoApi, PhotoId, Result, SelectedFile, TransportError};

/// In-memory photo service. Every call yields once before answering so
/// concurrent callers interleave on a single threaded runtime.
pub struct FakeApi {
    photos: Mutex<HashMap<EntityId, Vec<PhotoDescriptor>>>,
    failing: Mutex<HashSet<PhotoId>>,
    reject_uploads: Mutex<Option<TransportError>>,
    next_id: AtomicI64,
    pub metadata_calls: AtomicUsize,
    pub payload_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub uploaded: Mutex<Vec<(EntityId, SelectedFile)>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            photos: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            reject_uploads: Mutex::new(None),
            next_id: AtomicI64::new(1),
            metadata_calls: AtomicUsize::new(0),
            payload_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            uploaded: Mutex::new(vec![]),
        }
    }

    /// Stores `count` photos for `entity`, returning their ids.
    pub fn seed(&self, entity: EntityId, count: usize) -> Vec<PhotoId> {
        (0..count)
            .map(|i| {
                self.store(entity, &format!("photo-{i}.jpg"), "image/jpeg", 1024)
                    .id
            })
            .collect()
    }

    fn store(&self, entity: EntityId, name: &str, content_type: &str, size: u64) -> PhotoDescriptor {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let descriptor = PhotoDescriptor {
            id,
            entity,
            filename: name.to_string(),
            size,
            content_type: content_type.to_string(),
            main: false,
        };
        self.photos
            .lock()
            .unwrap()
            .entry(entity)
            .or_default()
            .push(descriptor.clone());
        descriptor
    }

    /// Next payload fetch of `photo` fails with a server error.
    pub fn fail_once(&self, photo: PhotoId) {
        self.failing.lock().unwrap().insert(photo);
    }

    pub fn reject_uploads(&self, error: TransportError) {
        *self.reject_uploads.lock().unwrap() = Some(error);
    }

    pub fn payloads_fetched(&self) -> usize {
        self.payload_calls.load(Ordering::SeqCst)
    }

    fn find(&self, photo: PhotoId) -> Option<PhotoDescriptor> {
        self.photos
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|d| d.id == photo)
            .cloned()
    }
}

#[async_trait]
impl PhotoApi for FakeApi {
    async fn photos(&self, entity: EntityId) -> Result<Vec<PhotoDescriptor>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        self.photos
            .lock()
            .unwrap()
            .get(&entity)
            .cloned()
            .ok_or_else(|| TransportError::NotFound.into())
    }

    async fn photo(&self, photo: PhotoId) -> Result<PhotoPayload> {
        self.payload_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.failing.lock().unwrap().remove(&photo) {
            return Err(TransportError::Server(500).into());
        }
        let descriptor = self.find(photo).ok_or(TransportError::NotFound)?;
        Ok(PhotoPayload::from_dto(PhotoDto {
            id: descriptor.id,
            filename: descriptor.filename,
            content_type: Some(descriptor.content_type),
            file_size: Some(descriptor.size),
            main: descriptor.main,
            base64_data: Some("aGk=".to_string()),
        })?)
    }

    async fn delete_photo(&self, photo: PhotoId) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let mut photos = self.photos.lock().unwrap();
        let before = photos.values().map(Vec::len).sum::<usize>();
        for descriptors in photos.values_mut() {
            descriptors.retain(|d| d.id != photo);
        }
        if photos.values().map(Vec::len).sum::<usize>() == before {
            return Err(TransportError::NotFound.into());
        }
        Ok(())
    }

    async fn upload_photos(
        &self,
        entity: EntityId,
        files: &[SelectedFile],
    ) -> Result<UploadReceipt> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some(error) = self.reject_uploads.lock().unwrap().clone() {
            return Err(error.into());
        }
        for file in files {
            self.store(entity, &file.name, file.content_type.as_ref(), file.size);
            self.uploaded.lock().unwrap().push((entity, file.clone()));
        }
        Ok(UploadReceipt {
            message: format!("Processed {} photos.", files.len()),
            errors: vec![],
        })
    }

    async fn photo_count(&self, entity: EntityId) -> Result<usize> {
        tokio::task::yield_now().await;
        Ok(self
            .photos
            .lock()
            .unwrap()
            .get(&entity)
            .map(Vec::len)
            .unwrap_or(0))
    }
}
