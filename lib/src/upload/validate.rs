use crate::config;
use crate::error::{ValidationError, ValidationReason};

use super::{SelectedFile, Selection};

/// Checks a single file against the type allow-list and size limits.
///
/// All problems found are reported, an empty list means the file is fine.
pub fn validate_file(file: &SelectedFile, settings: &config::Upload) -> Vec<ValidationError> {
    let mut errors = vec![];

    let essence = file.content_type.essence_str().to_ascii_lowercase();
    if !settings
        .allowed_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
    {
        errors.push(ValidationError::file(
            &file.name,
            ValidationReason::UnsupportedType(essence),
        ));
    }

    if file.size == 0 {
        errors.push(ValidationError::file(&file.name, ValidationReason::Empty));
    } else if file.size > settings.max_file_size {
        errors.push(ValidationError::file(
            &file.name,
            ValidationReason::TooLarge {
                size: file.size,
                max: settings.max_file_size,
            },
        ));
    }

    errors
}

/// Picks the candidates that may join a batch currently holding `current`
/// files.
///
/// A full batch rejects everything with a single capacity error. Otherwise
/// candidates are taken in order up to the remaining capacity, the rest is
/// dropped without error, and each taken candidate is validated on its own.
pub fn select_files(
    candidates: Vec<SelectedFile>,
    current: usize,
    settings: &config::Upload,
) -> Selection {
    let available = settings.max_files.saturating_sub(current);
    if available == 0 {
        return Selection {
            accepted: vec![],
            rejected: vec![ValidationError::batch(
                ValidationReason::CapacityExceeded {
                    max: settings.max_files,
                },
            )],
        };
    }

    let offered = candidates.len();
    let mut selection = Selection::default();
    for file in candidates.into_iter().take(available) {
        let errors = validate_file(&file, settings);
        if errors.is_empty() {
            selection.accepted.push(file);
        } else {
            selection.rejected.extend(errors);
        }
    }

    if offered > available {
        tracing::debug!(
            offered,
            available,
            "dropping candidates beyond batch capacity"
        );
    }

    selection
}
