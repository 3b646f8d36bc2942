use crate::api::PhotoDescriptor;
use crate::client::PhotoApi;
use crate::error::Result;
use crate::EntityId;

use super::{LoadState, PhotoLoader};

/// Cursor over the cached photos of one entity.
///
/// Moving the cursor loads the payload of the photo it lands on, unless
/// that photo is loaded or in flight already. Both directions wrap around.
pub struct Gallery<'a, A: PhotoApi> {
    loader: &'a PhotoLoader<A>,
    entity: EntityId,
    index: usize,
}

impl<'a, A: PhotoApi> Gallery<'a, A> {
    pub fn new(loader: &'a PhotoLoader<A>, entity: EntityId) -> Self {
        Self {
            loader,
            entity,
            index: 0,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    fn descriptors(&self) -> Vec<PhotoDescriptor> {
        self.loader.descriptors(self.entity).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.descriptors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the cursor, pulled back in range if the list shrank.
    pub fn index(&self) -> usize {
        self.index.min(self.len().saturating_sub(1))
    }

    pub fn current(&self) -> Option<PhotoDescriptor> {
        self.descriptors().get(self.index()).cloned()
    }

    pub async fn next(&mut self) -> Result<Option<PhotoDescriptor>> {
        let len = self.len();
        if len <= 1 {
            return Ok(self.current());
        }
        self.index = (self.index() + 1) % len;
        self.load_current().await
    }

    pub async fn previous(&mut self) -> Result<Option<PhotoDescriptor>> {
        let len = self.len();
        if len <= 1 {
            return Ok(self.current());
        }
        self.index = (self.index() + len - 1) % len;
        self.load_current().await
    }

    /// Jumps straight to `index`. Out of range indexes are ignored.
    pub async fn select(&mut self, index: usize) -> Result<Option<PhotoDescriptor>> {
        if index >= self.len() {
            tracing::debug!(index, entity = self.entity, "selected photo out of range");
            return Ok(self.current());
        }
        self.index = index;
        self.load_current().await
    }

    async fn load_current(&self) -> Result<Option<PhotoDescriptor>> {
        let current = self.current();
        if let Some(descriptor) = &current {
            match self.loader.state(descriptor.id) {
                LoadState::Loaded | LoadState::InFlight => (),
                LoadState::NotRequested | LoadState::Failed => {
                    self.loader.fetch_payload(descriptor.id).await?;
                }
            }
        }
        Ok(current)
    }
}
