//! Data exchanged with the remote photo service.
//!
//! Wire structures mirror the JSON bodies of the `/photo` routes. The
//! descriptor and payload types are what the rest of the crate works with.

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::{Result, TransportError};
use crate::{EntityId, PhotoId};

/// Photo record as serialized by the service. Metadata routes leave
/// `base64_data` empty, the single photo route fills it in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDto {
    pub id: PhotoId,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Serialized as `main` by the service, `isMain` by older builds.
    #[serde(default, alias = "isMain")]
    pub main: bool,
    #[serde(default)]
    pub base64_data: Option<String>,
}

/// Body of `GET /photo/{entity}/get-photos`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PhotosResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub photos: Vec<PhotoDto>,
}

/// Body of `GET /photo/image/{photo}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhotoResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub photo: PhotoDto,
}

/// Body of `POST /photo/{entity}/upload-photo`.
///
/// Full success carries only `message`, partial success (status 207) adds
/// per-file `errors`, outright failure carries `err_message`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub err_message: Option<String>,
}

/// Body of `GET /photo/{entity}/count`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub property_id: EntityId,
    pub photo_count: usize,
}

/// Generic `{ message }` / `{ errMessage }` body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub err_message: Option<String>,
}

/// Server-known metadata of a stored photo, without pixel data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoDescriptor {
    pub id: PhotoId,
    pub entity: EntityId,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
    pub main: bool,
}

impl PhotoDescriptor {
    /// The service does not echo the owning entity, it's taken from the
    /// request the descriptor came from.
    pub fn from_dto(entity: EntityId, dto: PhotoDto) -> Self {
        Self {
            id: dto.id,
            entity,
            filename: dto.filename,
            size: dto.file_size.unwrap_or(0),
            content_type: dto
                .content_type
                .unwrap_or_else(|| mime::IMAGE_JPEG.to_string()),
            main: dto.main,
        }
    }
}

/// Displayable image data of a single photo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhotoPayload {
    pub id: PhotoId,
    pub content_type: String,
    /// Base64 encoded image bytes, as delivered.
    pub data: String,
    pub fetched_at: DateTime<Utc>,
}

impl PhotoPayload {
    pub fn from_dto(dto: PhotoDto) -> std::result::Result<Self, TransportError> {
        let data = dto
            .base64_data
            .filter(|d| !d.is_empty())
            .ok_or_else(|| TransportError::Body(format!("photo {} carries no data", dto.id)))?;
        let content_type = dto
            .content_type
            .ok_or_else(|| TransportError::Body(format!("photo {} has no content type", dto.id)))?;
        Ok(Self {
            id: dto.id,
            content_type,
            data,
            fetched_at: Utc::now(),
        })
    }

    /// `data:` url usable directly as an image source.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.data)
    }

    /// Decoded image bytes.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.data)?)
    }
}

/// Acknowledgement of a successful upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub message: String,
    /// Per-file problems reported on partial success.
    pub errors: Vec<String>,
}

impl UploadReceipt {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}
