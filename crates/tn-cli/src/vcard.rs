//! Public profile cards for accounts and topics.

use std::path::Path;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::command::ProfileInput;
use crate::error::CliError;

/// Display name plus optional avatar, serialized into a `public` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vcard {
    #[serde(rename = "fn", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<Photo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Base64 of the raw image bytes.
    pub data: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// Reads avatar images referenced by `--photo`.
pub trait AvatarSource: Send + Sync {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// Reads avatars from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsAvatarSource;

impl AvatarSource for FsAvatarSource {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Build a vcard from a name and avatar path.
///
/// Returns `None` when there is nothing to put in the card. An unreadable
/// avatar is reported through `warnings` and the card is built without it.
pub fn make_vcard(
    profile: &ProfileInput,
    avatars: &dyn AvatarSource,
    warnings: &mut Vec<CliError>,
) -> Option<Vcard> {
    let full_name = profile
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let photo = profile
        .photo
        .as_deref()
        .and_then(|path| match avatars.read(path) {
            Ok(bytes) => Some(Photo {
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
                mime_type: mime_type_for(path),
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Avatar file unreadable");
                warnings.push(CliError::from_io_error(e, &path.display().to_string()));
                None
            }
        });

    if full_name.is_none() && photo.is_none() {
        return None;
    }
    Some(Vcard { full_name, photo })
}

/// Image type from the file extension.
pub fn mime_type_for(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "gif" => "image/gif".to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => "image/bmp".to_string(),
        "svg" => "image/svg+xml".to_string(),
        "" => "application/octet-stream".to_string(),
        other => format!("image/{other}"),
    }
}
