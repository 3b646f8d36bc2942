use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Error, Result};
use clap::{arg, value_parser, Arg, ArgAction, ArgMatches};
use tokio_util::sync::CancellationToken;

use hearth::api::PhotoDescriptor;
use hearth::upload::{FilePreview, MemoryPreviews};
use hearth::util::format_file_size;
use hearth::{
    Config, EntityId, Fetch, HttpPhotoApi, PhotoId, PhotoLoader, SelectedFile, Selection,
    StaticSession, UploadBatch,
};

use crate::util::{explain, retrieve_token, until_cancelled};

pub fn cmd() -> clap::Command {
    let entity = || arg!(<entity> "Property id").value_parser(value_parser!(EntityId));
    let photo = || arg!(<photo> "Photo id").value_parser(value_parser!(PhotoId));

    clap::Command::new("photos")
        .subcommand_required(true)
        .display_order(10)
        .about("Inspect and manage property photos")
        .subcommand(
            clap::Command::new("list")
                .about("Lists photos stored for a property")
                .arg(entity())
                .arg(
                    Arg::new("prefetch")
                        .long("prefetch")
                        .short('p')
                        .value_parser(value_parser!(usize))
                        .help("Number of photos to load right away, defaults to config"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print descriptors as json"),
                ),
        )
        .subcommand(
            clap::Command::new("get")
                .about("Fetches a single photo")
                .arg(photo())
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .value_name("PATH")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write image bytes to file"),
                ),
        )
        .subcommand(
            clap::Command::new("upload")
                .about("Uploads image files to a property")
                .arg(entity())
                .arg(
                    Arg::new("files")
                        .value_name("FILES")
                        .num_args(1..)
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            clap::Command::new("delete")
                .about("Deletes a photo of a property")
                .arg(entity())
                .arg(photo()),
        )
        .subcommand(
            clap::Command::new("count")
                .about("Counts photos stored for a property")
                .arg(entity()),
        )
}

pub async fn run(matches: &ArgMatches, config: &Config, cancel: CancellationToken) -> Result<()> {
    let token = retrieve_token().await?;
    let api = Arc::new(HttpPhotoApi::new(&config.api, StaticSession::new(token)).map_err(explain)?);
    let loader = PhotoLoader::new(api.clone()).with_cancellation(cancel.child_token());

    let result = match matches.subcommand() {
        Some(("list", m)) => {
            let entity = *m.get_one::<EntityId>("entity").ok_or(Error::msg("missing entity"))?;
            let prefetch = m
                .get_one::<usize>("prefetch")
                .copied()
                .unwrap_or(config.loader.prefetch);
            let descriptors = until_cancelled(&cancel, async {
                loader
                    .prefetch_first_n(entity, prefetch)
                    .await
                    .map_err(explain)
            })
            .await?;
            if m.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&descriptors)?);
            } else {
                print_descriptors(&loader, &descriptors);
            }
            Ok(())
        }
        Some(("get", m)) => {
            let photo = *m.get_one::<PhotoId>("photo").ok_or(Error::msg("missing photo"))?;
            let fetched = until_cancelled(&cancel, async {
                loader.fetch_payload(photo).await.map_err(explain)
            })
            .await?;
            let payload = match fetched {
                Fetch::Loaded(payload) => payload,
                Fetch::Pending => return Err(Error::msg("photo is still loading")),
            };
            let bytes = payload.bytes().map_err(explain)?;
            match m.get_one::<PathBuf>("out") {
                Some(path) => {
                    tokio::fs::write(path, &bytes).await?;
                    println!("wrote {} to {}", format_file_size(bytes.len() as u64), path.display());
                }
                None => println!(
                    "{}\t{}\t{}",
                    payload.id,
                    payload.content_type,
                    format_file_size(bytes.len() as u64)
                ),
            }
            Ok(())
        }
        Some(("upload", m)) => {
            let entity = *m.get_one::<EntityId>("entity").ok_or(Error::msg("missing entity"))?;
            let paths = m
                .get_many::<PathBuf>("files")
                .map(|paths| paths.cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            until_cancelled(&cancel, upload(&loader, config, entity, paths, cancel.child_token()))
                .await
        }
        Some(("delete", m)) => {
            let entity = *m.get_one::<EntityId>("entity").ok_or(Error::msg("missing entity"))?;
            let photo = *m.get_one::<PhotoId>("photo").ok_or(Error::msg("missing photo"))?;
            let remaining = until_cancelled(&cancel, async {
                loader.delete_photo(entity, photo).await.map_err(explain)
            })
            .await?;
            println!("deleted photo {}, {} left", photo, remaining.len());
            Ok(())
        }
        Some(("count", m)) => {
            let entity = *m.get_one::<EntityId>("entity").ok_or(Error::msg("missing entity"))?;
            let count = until_cancelled(&cancel, async {
                loader.photo_count(entity).await.map_err(explain)
            })
            .await?;
            println!("{}", count);
            Ok(())
        }
        _ => Err(Error::msg("unknown photos subcommand")),
    };

    loader.teardown();
    cancel.cancel();
    result
}

async fn upload(
    loader: &PhotoLoader<Arc<HttpPhotoApi>>,
    config: &Config,
    entity: EntityId,
    paths: Vec<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(SelectedFile::from_path(path).await.map_err(explain)?);
    }

    let batch =
        UploadBatch::new(config.upload.clone(), MemoryPreviews::new()).with_cancellation(cancel);
    let selection = batch.add(files).await.map_err(explain)?;
    for rejected in &selection.rejected {
        eprintln!("skipping: {}", rejected);
    }
    if dropped_for_capacity(paths.len(), &selection) {
        eprintln!(
            "only {} files can be uploaded at once",
            batch.settings().max_files
        );
    }

    let receipt = batch
        .upload(loader.api(), Some(entity))
        .await
        .map_err(explain)?;
    println!("{}", receipt.message);
    for error in &receipt.errors {
        eprintln!("server: {}", error);
    }

    let photos = loader.refresh(entity).await.map_err(explain)?;
    println!("property {} now has {} photos", entity, photos.len());
    Ok(())
}

/// Whether some of the `offered` files were neither accepted nor rejected,
/// i.e. fell beyond the batch capacity.
fn dropped_for_capacity(offered: usize, selection: &Selection<FilePreview>) -> bool {
    // a file can fail several checks, count it once
    let refused = selection
        .rejected
        .iter()
        .filter_map(|e| e.file.as_deref())
        .collect::<HashSet<_>>()
        .len();
    offered > selection.accepted.len() + refused
}

fn print_descriptors(loader: &PhotoLoader<Arc<HttpPhotoApi>>, descriptors: &[PhotoDescriptor]) {
    for d in descriptors {
        println!(
            "{}\t{}\t{}\t{}\t{:?}{}",
            d.id,
            d.filename,
            format_file_size(d.size),
            d.content_type,
            loader.state(d.id),
            if d.main { "\tmain" } else { "" },
        );
    }
    println!("{} photos", descriptors.len());
}
