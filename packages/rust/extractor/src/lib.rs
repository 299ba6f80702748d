//! Document extraction for docqa.
//!
//! Turns `.docx` files into an ordered list of [`ContentBlock`]s: text and
//! table blocks in reading order, followed by one image block per embedded
//! image, in relationship order. Images are written to an asset directory.

pub mod body;
pub mod package;

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use docqa_shared::{ContentBlock, DocQaError, Result};

pub use body::{BodyItem, CELL_DELIMITER, serialize_table, walk_body};
pub use package::{Package, Relationship};

/// Extension used when an image target has none.
const DEFAULT_IMAGE_EXTENSION: &str = "png";

/// An image written to the asset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    /// Relationship id inside the package (e.g. `rId7`).
    pub resource_id: String,
    /// File name inside the asset directory.
    pub filename: String,
    /// Full path of the written file.
    pub path: PathBuf,
}

/// Outcome of extracting a batch of documents.
#[derive(Debug, Default)]
pub struct BatchExtraction {
    pub blocks: Vec<ContentBlock>,
    /// Document names that produced output.
    pub processed: Vec<String>,
    /// Documents that were skipped, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Document identifier: the file stem with spaces replaced by underscores.
pub fn document_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace(' ', "_"))
        .unwrap_or_default()
}

/// Write every embedded image of `package` into `images_dir`.
///
/// Files are named `<doc_name>_img_<n>.<ext>` where `n` is the position of
/// the relationship in the package's relationship list. A resource that
/// cannot be read or written is logged and skipped.
#[instrument(skip_all, fields(doc = %doc_name))]
pub fn extract_images(package: &mut Package, doc_name: &str, images_dir: &Path) -> Vec<ImageAsset> {
    let rels = match package.relationships() {
        Ok(rels) => rels,
        Err(e) => {
            warn!(error = %e, "could not read relationships, no images extracted");
            return Vec::new();
        }
    };

    let mut assets = Vec::new();
    for (index, rel) in rels.iter().enumerate() {
        if !rel.is_embedded_image() {
            continue;
        }

        let part = rel.part_name();
        let bytes = match package.read_part(&part) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(resource = %rel.id, part = %part, error = %e, "skipping unreadable image");
                continue;
            }
        };

        let extension = Path::new(&part)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string());
        let filename = format!("{doc_name}_img_{index}.{extension}");
        let path = images_dir.join(&filename);

        if let Err(e) = std::fs::write(&path, &bytes) {
            warn!(
                resource = %rel.id,
                path = %path.display(),
                error = %e,
                "skipping image that could not be written"
            );
            continue;
        }

        debug!(resource = %rel.id, file = %filename, bytes = bytes.len(), "image written");
        assets.push(ImageAsset {
            resource_id: rel.id.clone(),
            filename,
            path,
        });
    }

    assets
}

/// Paragraph and table blocks in reading order, followed by one image block
/// per asset in `images`.
#[instrument(skip_all, fields(doc = %doc_name))]
pub fn extract_blocks(
    package: &mut Package,
    doc_name: &str,
    images: &[ImageAsset],
) -> Result<Vec<ContentBlock>> {
    let xml = package.document_xml()?;
    let items = walk_body(&xml)?;

    let mut blocks = Vec::with_capacity(items.len() + images.len());
    for item in items {
        match item {
            BodyItem::Paragraph(text) => blocks.push(ContentBlock::text(doc_name, text)),
            BodyItem::Table(rows) => {
                let text = serialize_table(&rows);
                if !text.trim().is_empty() {
                    blocks.push(ContentBlock::table(doc_name, text));
                }
            }
        }
    }

    for image in images {
        blocks.push(ContentBlock::image(
            doc_name,
            format!("Image File: {}", image.filename),
            image.path.clone(),
        ));
    }

    Ok(blocks)
}

/// Extract one document: images first (so blocks can reference them), then
/// the ordered block list.
pub fn extract_document(path: &Path, images_dir: &Path) -> Result<Vec<ContentBlock>> {
    let doc_name = document_name(path);
    let mut package = Package::open(path)?;
    let images = extract_images(&mut package, &doc_name, images_dir);
    extract_blocks(&mut package, &doc_name, &images)
}

/// Extract every document in order. Missing or unreadable documents are
/// logged and skipped; the rest are still processed.
#[instrument(skip_all, fields(documents = paths.len()))]
pub fn extract_batch(paths: &[PathBuf], images_dir: &Path) -> Result<BatchExtraction> {
    std::fs::create_dir_all(images_dir).map_err(|e| DocQaError::io(images_dir, e))?;

    let mut batch = BatchExtraction::default();
    for path in paths {
        match extract_document(path, images_dir) {
            Ok(blocks) => {
                info!(path = %path.display(), blocks = blocks.len(), "document extracted");
                batch.processed.push(document_name(path));
                batch.blocks.extend(blocks);
            }
            Err(e) if e.is_source_missing() => {
                warn!(path = %path.display(), "document not found, skipping");
                batch.skipped.push((path.clone(), e.to_string()));
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "document could not be extracted, skipping"
                );
                batch.skipped.push((path.clone(), e.to_string()));
            }
        }
    }

    Ok(batch)
}

/// Overwrite `path` with the pretty-printed block list.
pub fn write_blocks(path: &Path, blocks: &[ContentBlock]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DocQaError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(blocks)
        .map_err(|e| DocQaError::parse(format!("failed to serialize blocks: {e}")))?;
    std::fs::write(path, json).map_err(|e| DocQaError::io(path, e))
}

/// Read a block list previously written by [`write_blocks`].
pub fn read_blocks(path: &Path) -> Result<Vec<ContentBlock>> {
    if !path.exists() {
        return Err(DocQaError::SourceMissing {
            path: path.to_path_buf(),
        });
    }
    let json = std::fs::read_to_string(path).map_err(|e| DocQaError::io(path, e))?;
    serde_json::from_str(&json)
        .map_err(|e| DocQaError::parse(format!("{}: {e}", path.display())))
}
