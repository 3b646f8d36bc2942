//! Walks through the photos of a property the way a preview view does.
//!
//! Run with a token and a property id:
//!
//! ```text
//! HEARTH_TOKEN=... cargo run --example browse -- 9
//! ```

use std::sync::Arc;

use hearth::{config, Config, Gallery, HttpPhotoApi, PhotoLoader, StaticSession};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // hearth.toml is optional here
    let config: Config = config::load().unwrap_or_default();
    hearth::tracing::init(&config)?;

    let entity = std::env::args()
        .nth(1)
        .ok_or(anyhow::Error::msg("usage: browse <property id>"))?
        .parse()?;
    let session = StaticSession::new(std::env::var("HEARTH_TOKEN").unwrap_or_default());

    let api = Arc::new(HttpPhotoApi::new(&config.api, session)?);
    let loader = PhotoLoader::new(api);

    let photos = loader
        .prefetch_first_n(entity, config.loader.prefetch)
        .await?;
    println!("{} photos", photos.len());

    // one full lap, every photo gets loaded on arrival
    let mut gallery = Gallery::new(&loader, entity);
    for _ in 0..gallery.len() {
        if let Some(photo) = gallery.current() {
            let size = loader.payload(photo.id).map(|p| p.data.len()).unwrap_or(0);
            println!("{} {} ({} base64 bytes)", photo.id, photo.filename, size);
        }
        gallery.next().await?;
    }

    loader.teardown();
    Ok(())
}
