use anyhow::{Context, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use std::fs;
use std::path::{Path, PathBuf};

/// A unit of source text with its origin metadata. Immutable once loaded;
/// the chat pipeline never modifies documents.
#[derive(Debug, Clone)]
pub struct Document {
    /// The text content of the document.
    pub content: String,
    /// The document's file name, used as its identifier.
    pub document_id: String,
    /// Full path the document was loaded from.
    pub origin: PathBuf,
    /// The document's MIME type.
    pub mime_type: String,
}

impl Document {
    /// Load a single document from a file path.
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .context("Invalid file name")?
            .to_str()
            .context("Invalid file name encoding")?
            .to_string();

        let mime = from_path(path).first_or_octet_stream();
        let mime_type = mime.to_string();
        debug!("Detected MIME type {} for {}", mime_type, path.display());

        let content = read_content(path, &mime_type)?;

        Ok(Document {
            content,
            document_id: file_name,
            origin: path.to_path_buf(),
            mime_type,
        })
    }
}

/// Load every supported document under `dir`.
///
/// Hidden files and unsupported formats are skipped with a warning instead
/// of failing the whole corpus. Results are sorted by path so repeated
/// index builds see the documents in a stable order. A directory that
/// yields no documents at all is an error: an empty corpus cannot serve.
pub fn load_directory<P: AsRef<Path>>(dir: P, recursive: bool) -> Result<Vec<Document>> {
    let dir = dir.as_ref();
    let mut documents = Vec::new();
    let mut files = Vec::new();
    collect_files(dir, recursive, &mut files)
        .with_context(|| format!("Failed to read document directory {}", dir.display()))?;
    files.sort();

    for path in files {
        match Document::from_file(&path) {
            Ok(document) => {
                info!(
                    "Loaded {} ({} chars)",
                    path.display(),
                    document.content.len()
                );
                documents.push(document);
            }
            Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
        }
    }

    if documents.is_empty() {
        anyhow::bail!("No readable documents found in {}", dir.display());
    }
    Ok(documents)
}

fn collect_files(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            if recursive {
                collect_files(&path, recursive, files)?;
            }
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Read content from a document based on its MIME type.
fn read_content(path: &Path, mime_type: &str) -> Result<String> {
    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Extracting text from PDF {}", path.display());
            let content = extract_text(path)
                .with_context(|| format!("Failed to extract text from PDF {}", path.display()))?;
            let cleaned = normalize_whitespace(&content);
            if cleaned.is_empty() {
                warn!("PDF {} produced no text", path.display());
            }
            Ok(cleaned)
        }
        mime if mime.starts_with("text/") => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file {}", path.display()))?;
            Ok(content)
        }
        other => Err(anyhow::anyhow!(
            "Unsupported document format {}: only text and PDF files are supported",
            other
        )),
    }
}

/// Collapse runs of spaces and newlines left behind by PDF extraction.
/// Runs of two or more newlines become a paragraph break.
fn normalize_whitespace(text: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();

    for line in text.replace('\r', "").lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current = Vec::new();
            }
        } else {
            current.push(collapsed);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs.join("\n\n")
}
