use std::path::Path;

use image::GenericImageView;
use tracing::info;
use zphh_contracts::envelope::UploadedSource;

use crate::acquire::AcquiredImage;
use crate::client::ChatGlmClient;
use crate::gateway::ApiError;
use crate::transport::MultipartField;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Multipart fields for the upload endpoint: the file plus its decoded
/// pixel dimensions.
pub fn upload_fields(image: &AcquiredImage) -> Result<Vec<MultipartField>, UploadError> {
    let (width, height) = image::load_from_memory(&image.bytes)?.dimensions();
    let file_name = image
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("image.png")
        .to_string();
    Ok(vec![
        MultipartField::File {
            name: "file".to_string(),
            file_name,
            mime: mime_for_path(&image.path).to_string(),
            bytes: image.bytes.clone(),
        },
        MultipartField::Text {
            name: "width".to_string(),
            value: width.to_string(),
        },
        MultipartField::Text {
            name: "height".to_string(),
            value: height.to_string(),
        },
    ])
}

pub fn upload_image(
    client: &ChatGlmClient,
    image: &AcquiredImage,
) -> Result<UploadedSource, UploadError> {
    let fields = upload_fields(image)?;
    let source = client.upload_image(fields)?;
    info!(source_id = %source.source_id, path = %image.path.display(), "image uploaded");
    Ok(source)
}
