//! Access to the parts of a `.docx` package (a zip archive of XML parts).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;

use docqa_shared::{DocQaError, Result};

const DOCUMENT_PART: &str = "word/document.xml";
const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
const IMAGE_RELATIONSHIP_SUFFIX: &str = "/image";

/// One entry of `word/_rels/document.xml.rels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    /// Embedded image stored inside the package.
    pub fn is_embedded_image(&self) -> bool {
        !self.external && self.rel_type.ends_with(IMAGE_RELATIONSHIP_SUFFIX)
    }

    /// Zip entry name of the target, resolved against `word/`.
    pub fn part_name(&self) -> String {
        resolve_target(&self.target)
    }
}

/// An opened `.docx` file.
pub struct Package {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl Package {
    /// Open the archive. A missing file maps to [`DocQaError::SourceMissing`].
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DocQaError::SourceMissing {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|e| DocQaError::io(path, e))?;
        let archive = ZipArchive::new(file)
            .map_err(|e| {
                DocQaError::parse(format!("{} is not a docx package: {e}", path.display()))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Main document XML.
    pub fn document_xml(&mut self) -> Result<String> {
        let bytes = self.read_part(DOCUMENT_PART)?;
        String::from_utf8(bytes)
            .map_err(|e| DocQaError::parse(format!("{DOCUMENT_PART} is not UTF-8: {e}")))
    }

    /// Relationships of the main document, in file order. A package without
    /// a relationships part has none.
    pub fn relationships(&mut self) -> Result<Vec<Relationship>> {
        if self.archive.index_for_name(DOCUMENT_RELS_PART).is_none() {
            return Ok(Vec::new());
        }
        let bytes = self.read_part(DOCUMENT_RELS_PART)?;
        let xml = String::from_utf8(bytes)
            .map_err(|e| DocQaError::parse(format!("{DOCUMENT_RELS_PART} is not UTF-8: {e}")))?;
        parse_relationships(&xml)
    }

    /// Raw bytes of a named part.
    pub fn read_part(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut entry = self.archive.by_name(name).map_err(|e| {
            DocQaError::parse(format!("{}: missing part {name}: {e}", self.path.display()))
        })?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| DocQaError::io(&self.path, e))?;
        Ok(bytes)
    }
}

fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut rel = Relationship {
                    id: String::new(),
                    rel_type: String::new(),
                    target: String::new(),
                    external: false,
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| {
                        DocQaError::parse(format!("bad relationship attribute: {err}"))
                    })?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| DocQaError::parse(format!("bad relationship value: {err}")))?
                        .into_owned();
                    match attr.key.local_name().as_ref() {
                        b"Id" => rel.id = value,
                        b"Type" => rel.rel_type = value,
                        b"Target" => rel.target = value,
                        b"TargetMode" => rel.external = value.eq_ignore_ascii_case("External"),
                        _ => {}
                    }
                }
                rels.push(rel);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DocQaError::parse(format!(
                    "malformed {DOCUMENT_RELS_PART}: {e}"
                )));
            }
            _ => {}
        }
    }

    Ok(rels)
}

/// Resolve a relationship target to a zip entry name. Targets are relative
/// to `word/` unless absolute.
fn resolve_target(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = vec!["word"];
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
