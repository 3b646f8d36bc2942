//! Lazy photo loading.
//!
//! Metadata for an entity is cheap and fetched as a whole. Payloads are
//! expensive and fetched one photo at a time, on demand, with the per-photo
//! [`LoadState`] guaranteeing that no photo is ever requested twice at once.
//!
//! Every request gets a ticket. A result is only applied if its ticket is
//! still the current one for that id, so responses arriving after an
//! invalidation or a teardown are dropped instead of resurrecting state.

mod gallery;

pub use gallery::Gallery;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::api::{PhotoDescriptor, PhotoPayload};
use crate::client::PhotoApi;
use crate::error::{Error, ErrorKind, Result, TransportError};
use crate::{EntityId, PhotoId};

/// Fetch status of a single photo payload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    NotRequested,
    InFlight,
    Loaded,
    Failed,
}

/// What to drop from the cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Entity(EntityId),
    Photo(PhotoId),
}

/// Result of asking for a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetch {
    Loaded(PhotoPayload),
    /// Another request for the same photo is already underway, nothing was
    /// sent. See [`PhotoLoader::wait_for`].
    Pending,
}

impl Fetch {
    pub fn payload(self) -> Option<PhotoPayload> {
        match self {
            Fetch::Loaded(p) => Some(p),
            Fetch::Pending => None,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Slot {
    state: LoadState,
    ticket: u64,
}

#[derive(Default)]
struct Cache {
    descriptors: HashMap<EntityId, Vec<PhotoDescriptor>>,
    payloads: HashMap<PhotoId, PhotoPayload>,
    slots: HashMap<PhotoId, Slot>,
    metadata_tickets: HashMap<EntityId, u64>,
    next_ticket: u64,
}

impl Cache {
    fn issue(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn forget_photo(&mut self, photo: PhotoId) {
        self.payloads.remove(&photo);
        self.slots.remove(&photo);
    }

    fn state(&self, photo: PhotoId) -> LoadState {
        self.slots
            .get(&photo)
            .map(|s| s.state)
            .unwrap_or(LoadState::NotRequested)
    }
}

/// Per-view cache of photo metadata and payloads.
pub struct PhotoLoader<A: PhotoApi> {
    api: A,
    cache: Mutex<Cache>,
    settled: Notify,
    cancel: CancellationToken,
}

impl<A: PhotoApi> PhotoLoader<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            cache: Mutex::new(Cache::default()),
            settled: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the loader lifetime to an outer token, e.g. the owning view's.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_alive(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ErrorKind::Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// Cached descriptors of `entity`, if metadata was fetched.
    pub fn descriptors(&self, entity: EntityId) -> Option<Vec<PhotoDescriptor>> {
        self.cache().descriptors.get(&entity).cloned()
    }

    /// Cached payload of `photo`, if loaded.
    pub fn payload(&self, photo: PhotoId) -> Option<PhotoPayload> {
        self.cache().payloads.get(&photo).cloned()
    }

    pub fn state(&self, photo: PhotoId) -> LoadState {
        self.cache().state(photo)
    }

    /// Fetches the photo list of `entity`, replacing whatever was cached.
    ///
    /// An entity the service doesn't know yields an empty list.
    pub async fn fetch_metadata(&self, entity: EntityId) -> Result<Vec<PhotoDescriptor>> {
        self.check_alive()?;

        let ticket = {
            let mut cache = self.cache();
            let ticket = cache.issue();
            cache.metadata_tickets.insert(entity, ticket);
            ticket
        };

        let descriptors = match self.api.photos(entity).await {
            Ok(descriptors) => descriptors,
            Err(e) if e.transport() == Some(&TransportError::NotFound) => {
                tracing::debug!(entity, "no photos stored");
                vec![]
            }
            Err(e) => {
                tracing::warn!(entity, "fetching photo metadata failed: {}", e.kind);
                return Err(e);
            }
        };

        self.check_alive()?;

        let mut cache = self.cache();
        if cache.metadata_tickets.get(&entity) != Some(&ticket) {
            tracing::debug!(entity, "discarding superseded photo metadata");
            return Ok(descriptors);
        }
        cache.metadata_tickets.remove(&entity);

        // payloads of photos that disappeared server-side go too
        let stale = cache
            .descriptors
            .get(&entity)
            .map(|old| {
                old.iter()
                    .filter(|o| !descriptors.iter().any(|d| d.id == o.id))
                    .map(|o| o.id)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for photo in stale {
            cache.forget_photo(photo);
        }
        cache.descriptors.insert(entity, descriptors.clone());

        tracing::debug!(entity, count = descriptors.len(), "photo metadata cached");
        Ok(descriptors)
    }

    /// Fetches the payload of `photo` unless it's loaded or already being
    /// fetched.
    ///
    /// A loaded photo is served from the cache. A photo in flight yields
    /// [`Fetch::Pending`] without touching the network. Otherwise, including
    /// after a previous failure, a single request is made.
    pub async fn fetch_payload(&self, photo: PhotoId) -> Result<Fetch> {
        self.check_alive()?;

        let ticket = {
            let mut cache = self.cache();
            match cache.state(photo) {
                LoadState::Loaded => {
                    if let Some(payload) = cache.payloads.get(&photo) {
                        return Ok(Fetch::Loaded(payload.clone()));
                    }
                }
                LoadState::InFlight => {
                    tracing::debug!(photo, "payload already in flight");
                    return Ok(Fetch::Pending);
                }
                LoadState::NotRequested | LoadState::Failed => (),
            }
            let ticket = cache.issue();
            cache.slots.insert(
                photo,
                Slot {
                    state: LoadState::InFlight,
                    ticket,
                },
            );
            ticket
        };

        let abandoned = Abandoned {
            loader: self,
            photo,
            ticket,
            armed: true,
        };
        let result = self.api.photo(photo).await;
        abandoned.disarm();

        self.check_alive()?;

        let outcome = {
            let mut cache = self.cache();
            let current = matches!(
                cache.slots.get(&photo),
                Some(slot) if slot.ticket == ticket && slot.state == LoadState::InFlight
            );
            match result {
                Ok(payload) => {
                    if current {
                        cache.slots.insert(
                            photo,
                            Slot {
                                state: LoadState::Loaded,
                                ticket,
                            },
                        );
                        cache.payloads.insert(photo, payload.clone());
                        tracing::debug!(photo, "payload loaded");
                    } else {
                        tracing::debug!(photo, "discarding payload of invalidated photo");
                    }
                    Ok(Fetch::Loaded(payload))
                }
                Err(e) => {
                    if current {
                        cache.slots.insert(
                            photo,
                            Slot {
                                state: LoadState::Failed,
                                ticket,
                            },
                        );
                    }
                    tracing::warn!(photo, "fetching payload failed: {}", e.kind);
                    if e.transport() == Some(&TransportError::NotFound) {
                        Err(Error::new(ErrorKind::PhotoNotFound(photo)))
                    } else {
                        Err(e)
                    }
                }
            }
        };

        self.settled.notify_waiters();
        outcome
    }

    /// Waits until `photo` is no longer in flight and returns its payload if
    /// it ended up loaded.
    pub async fn wait_for(&self, photo: PhotoId) -> Option<PhotoPayload> {
        loop {
            let notified = self.settled.notified();
            let mut notified = std::pin::pin!(notified);
            // register before looking, a completion in between must not be
            // missed
            notified.as_mut().enable();

            {
                let cache = self.cache();
                match cache.state(photo) {
                    LoadState::InFlight => (),
                    LoadState::Loaded => return cache.payloads.get(&photo).cloned(),
                    LoadState::NotRequested | LoadState::Failed => return None,
                }
            }
            if self.cancel.is_cancelled() {
                return None;
            }

            notified.await;
        }
    }

    /// Fetches metadata, then the payloads of the first `n` photos.
    ///
    /// Payload failures are logged and leave the photo `Failed`, only
    /// a metadata failure is returned.
    pub async fn prefetch_first_n(
        &self,
        entity: EntityId,
        n: usize,
    ) -> Result<Vec<PhotoDescriptor>> {
        let descriptors = self.fetch_metadata(entity).await?;

        let fetches = descriptors
            .iter()
            .take(n)
            .map(|d| self.fetch_payload(d.id));
        for (descriptor, result) in descriptors.iter().zip(join_all(fetches).await) {
            if let Err(e) = result {
                tracing::debug!(photo = descriptor.id, "prefetch failed: {}", e.kind);
            }
        }

        Ok(descriptors)
    }

    /// Drops cached state, resetting affected photos to `NotRequested`.
    ///
    /// Responses already in flight for the target are discarded when they
    /// arrive.
    pub fn invalidate(&self, target: Target) {
        let mut cache = self.cache();
        match target {
            Target::Entity(entity) => {
                cache.metadata_tickets.remove(&entity);
                if let Some(descriptors) = cache.descriptors.remove(&entity) {
                    for descriptor in descriptors {
                        cache.forget_photo(descriptor.id);
                    }
                }
            }
            Target::Photo(photo) => {
                cache.forget_photo(photo);
                for descriptors in cache.descriptors.values_mut() {
                    descriptors.retain(|d| d.id != photo);
                }
            }
        }
        drop(cache);
        tracing::debug!(?target, "photo cache invalidated");
        self.settled.notify_waiters();
    }

    /// Forces a fresh metadata fetch for `entity`, e.g. after an upload.
    pub async fn refresh(&self, entity: EntityId) -> Result<Vec<PhotoDescriptor>> {
        self.invalidate(Target::Entity(entity));
        self.fetch_metadata(entity).await
    }

    /// Deletes `photo` remotely, then drops it locally and re-fetches the
    /// photo list of its owning `entity`.
    pub async fn delete_photo(
        &self,
        entity: EntityId,
        photo: PhotoId,
    ) -> Result<Vec<PhotoDescriptor>> {
        self.check_alive()?;

        if let Err(e) = self.api.delete_photo(photo).await {
            tracing::warn!(photo, "deleting photo failed: {}", e.kind);
            return Err(e);
        }
        tracing::info!(entity, photo, "photo deleted");

        self.invalidate(Target::Photo(photo));
        self.fetch_metadata(entity).await
    }

    /// Number of photos stored for `entity`, straight from the service.
    pub async fn photo_count(&self, entity: EntityId) -> Result<usize> {
        self.check_alive()?;
        self.api.photo_count(entity).await
    }

    /// Abandons pending work and clears every cache. Results arriving later
    /// are ignored.
    pub fn teardown(&self) {
        self.cancel.cancel();
        *self.cache() = Cache::default();
        self.settled.notify_waiters();
    }
}

/// Resets an in-flight slot whose fetch was dropped before the response
/// arrived, so the photo can be requested again and waiters wake up.
struct Abandoned<'a, A: PhotoApi> {
    loader: &'a PhotoLoader<A>,
    photo: PhotoId,
    ticket: u64,
    armed: bool,
}

impl<A: PhotoApi> Abandoned<'_, A> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<A: PhotoApi> Drop for Abandoned<'_, A> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut cache = self.loader.cache();
            let current = matches!(
                cache.slots.get(&self.photo),
                Some(slot) if slot.ticket == self.ticket && slot.state == LoadState::InFlight
            );
            if !current {
                return;
            }
            cache.slots.remove(&self.photo);
        }
        tracing::debug!(photo = self.photo, "payload fetch abandoned");
        self.loader.settled.notify_waiters();
    }
}
