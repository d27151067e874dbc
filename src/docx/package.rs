use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use tempfile::NamedTempFile;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONTENT_TYPES: &str = "[Content_Types].xml";
pub const ROOT_RELS: &str = "_rels/.rels";
pub const DOCUMENT: &str = "word/document.xml";
pub const DOCUMENT_RELS: &str = "word/_rels/document.xml.rels";

pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxEntry {
    fn new(name: String, data: Vec<u8>) -> Self {
        Self {
            name,
            data,
            compression: CompressionMethod::Deflated,
            last_modified: zip::DateTime::default(),
            unix_mode: None,
            is_dir: false,
        }
    }
}

/// Sort key for repacking: manifest, root relationships, document relationships, the rest.
///
/// Consuming readers expect `[Content_Types].xml` to be the first entry of the archive.
pub fn part_rank(name: &str) -> u8 {
    if name == CONTENT_TYPES {
        0
    } else if name.starts_with("_rels") {
        1
    } else if name.starts_with("word/_rels") {
        2
    } else {
        3
    }
}

impl DocxPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open docx: {}", path.display()))?;
        let mut zip = ZipArchive::new(f).context("read zip")?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry: {}", file.name()))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        debug!(path = %path.display(), entries = entries.len(), "read package");
        Ok(Self { entries })
    }

    /// Build a package from an unpacked working directory. Part names use `/` separators.
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(cur) = pending.pop() {
            for ent in fs::read_dir(&cur).with_context(|| format!("read dir: {}", cur.display()))? {
                let ent = ent.with_context(|| format!("read dir entry: {}", cur.display()))?;
                let path = ent.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let rel = path
                    .strip_prefix(dir)
                    .with_context(|| format!("relativize: {}", path.display()))?;
                let name = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((name, path));
            }
        }
        files.sort();

        let mut entries = Vec::with_capacity(files.len());
        for (name, path) in files {
            let data = fs::read(&path).with_context(|| format!("read part: {}", path.display()))?;
            entries.push(DocxEntry::new(name, data));
        }
        Ok(Self { entries })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| !e.is_dir && e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.part(name).is_some()
    }

    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(ent) => ent.data = data,
            None => self.entries.push(DocxEntry::new(name.to_string(), data)),
        }
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(|e| !e.is_dir).map(|e| e.name.as_str())
    }

    pub fn xml_entries(&self) -> Vec<&DocxEntry> {
        self.entries
            .iter()
            .filter(|e| e.name.to_lowercase().ends_with(".xml"))
            .collect()
    }

    /// Extract every part below `dir`, refusing entry names that escape it.
    pub fn unpack_to(&self, dir: &Path) -> anyhow::Result<()> {
        for ent in &self.entries {
            let rel = enclosed_path(&ent.name)
                .ok_or_else(|| anyhow!("unsafe zip entry name: {}", ent.name))?;
            let target = dir.join(rel);
            if ent.is_dir || ent.name.ends_with('/') {
                fs::create_dir_all(&target)
                    .with_context(|| format!("create dir: {}", target.display()))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create dir: {}", parent.display()))?;
            }
            fs::write(&target, &ent.data)
                .with_context(|| format!("write part: {}", target.display()))?;
        }
        Ok(())
    }

    /// Write the package with the part order consuming readers require.
    ///
    /// The archive is assembled in a temporary file next to `output_path` and moved into
    /// place only once complete, so a failed write never leaves a truncated package.
    pub fn write(&self, output_path: &Path) -> anyhow::Result<()> {
        let mut order: Vec<&DocxEntry> = self.entries.iter().collect();
        order.sort_by(|a, b| (part_rank(&a.name), &a.name).cmp(&(part_rank(&b.name), &b.name)));

        let out_dir = match output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&out_dir)
            .with_context(|| format!("create temp file in: {}", out_dir.display()))?;
        {
            let mut zout = ZipWriter::new(tmp.as_file_mut());
            for ent in order {
                let mut opts = SimpleFileOptions::default()
                    .compression_method(ent.compression)
                    .last_modified_time(ent.last_modified);
                if let Some(mode) = ent.unix_mode {
                    opts = opts.unix_permissions(mode);
                }
                if ent.is_dir || ent.name.ends_with('/') {
                    zout.add_directory(ent.name.as_str(), opts)
                        .with_context(|| format!("add zip dir: {}", ent.name))?;
                } else {
                    zout.start_file(ent.name.as_str(), opts)
                        .with_context(|| format!("start zip file: {}", ent.name))?;
                    zout.write_all(&ent.data)
                        .with_context(|| format!("write zip file: {}", ent.name))?;
                }
            }
            zout.finish().context("finish zip")?;
        }
        tmp.persist(output_path)
            .with_context(|| format!("persist output docx: {}", output_path.display()))?;
        debug!(path = %output_path.display(), entries = self.entries.len(), "wrote package");
        Ok(())
    }
}

fn enclosed_path(name: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for seg in name.split(['/', '\\']) {
        match seg {
            "" | "." => continue,
            ".." => return None,
            s if s.contains(':') => return None,
            s => out.push(s),
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Minimal in-memory packages for tests.

    use std::io::Write;
    use std::path::{Path, PathBuf};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    pub const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

    pub const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

    pub const DOC_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/settings" Target="settings.xml"/></Relationships>"#;

    pub const SETTINGS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:settings xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:zoom w:percent="100"/><w:defaultTabStop w:val="720"/><w:compat/></w:settings>"#;

    pub const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:rPr><w:sz w:val="21"/></w:rPr></w:style></w:styles>"#;

    /// Wrap body XML in a `w:document` carrying the usual namespace declarations.
    pub fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{W_NS}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:w14="http://schemas.microsoft.com/office/word/2010/wordml" xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture"><w:body>{body}</w:body></w:document>"#
        )
    }

    pub fn write_zip(path: &Path, parts: &[(&str, &[u8])]) {
        let f = std::fs::File::create(path).expect("create fixture");
        let mut z = ZipWriter::new(f);
        for (name, data) in parts {
            z.start_file(*name, SimpleFileOptions::default()).expect("start");
            z.write_all(data).expect("write");
        }
        z.finish().expect("finish");
    }

    /// A complete minimal package whose document body is `body`.
    pub fn docx(dir: &Path, name: &str, body: &str) -> PathBuf {
        docx_with(dir, name, body, &[])
    }

    pub fn docx_with(dir: &Path, name: &str, body: &str, extra: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let doc = document(body);
        let mut parts: Vec<(&str, &[u8])> = vec![
            ("word/document.xml", doc.as_bytes()),
            ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes()),
            ("word/_rels/document.xml.rels", DOC_RELS_XML.as_bytes()),
            ("_rels/.rels", ROOT_RELS_XML.as_bytes()),
            ("word/settings.xml", SETTINGS_XML.as_bytes()),
            ("word/styles.xml", STYLES_XML.as_bytes()),
        ];
        for &(n, d) in extra {
            match parts.iter_mut().find(|(pn, _)| *pn == n) {
                Some(slot) => slot.1 = d,
                None => parts.push((n, d)),
            }
        }
        write_zip(&path, &parts);
        path
    }
}
