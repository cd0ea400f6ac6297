//! Plain-text extraction for uploaded files.
//!
//! The file type is taken from the extension. Extraction never panics: a
//! malformed file returns a [`DocumentParseError`] and the session goes on
//! without it.

use std::io::Read;
use std::path::Path;

use crate::error::DocumentParseError;
use crate::models::Document;

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Turn an uploaded file into a [`Document`] named after the file.
pub fn extract_document(name: &str, bytes: &[u8]) -> Result<Document, DocumentParseError> {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let text = match extension.as_str() {
        "txt" | "md" | "markdown" => String::from_utf8_lossy(bytes).into_owned(),
        "json" => pretty_json(name, bytes)?,
        "docx" => extract_docx(bytes)?,
        "pdf" => extract_pdf(bytes)?,
        "" => return Err(DocumentParseError::UnsupportedType(name.to_string())),
        other => return Err(DocumentParseError::UnsupportedType(other.to_string())),
    };

    Ok(Document {
        source_id: name.to_string(),
        text,
    })
}

/// Read and extract a file from disk.
pub fn extract_file(path: &Path) -> Result<Document, DocumentParseError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let bytes = std::fs::read(path).map_err(|e| DocumentParseError::Io {
        name: path.display().to_string(),
        message: e.to_string(),
    })?;
    extract_document(&name, &bytes)
}

/// Load the standing JSON context supplement, pretty-printed.
pub fn load_standing_context(path: &Path) -> Result<String, DocumentParseError> {
    let name = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| DocumentParseError::Io {
        name: name.clone(),
        message: e.to_string(),
    })?;
    pretty_json(&name, &bytes)
}

fn pretty_json(name: &str, bytes: &[u8]) -> Result<String, DocumentParseError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| DocumentParseError::Json {
            name: name.to_string(),
            message: e.to_string(),
        })?;
    serde_json::to_string_pretty(&value).map_err(|e| DocumentParseError::Json {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<String, DocumentParseError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| DocumentParseError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, DocumentParseError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| DocumentParseError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| DocumentParseError::Docx("word/document.xml not found".to_string()))?;

    let doc_xml = read_capped(entry, MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(&doc_xml)
}

/// Read at most `limit` bytes. One byte past the limit is an error.
fn read_capped(reader: impl Read, limit: u64) -> Result<Vec<u8>, DocumentParseError> {
    let mut buf = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut buf)
        .map_err(|e| DocumentParseError::Docx(e.to_string()))?;
    if buf.len() as u64 > limit {
        return Err(DocumentParseError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    Ok(buf)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, DocumentParseError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| DocumentParseError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DocumentParseError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}
