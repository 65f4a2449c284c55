//! Material input handling: normalization to bytes, content-type sniffing and
//! chunk coalescing for document-reading sessions.

use super::providers::{FragmentStream, ProviderError};
use futures::StreamExt;
use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";

/// Raw material as supplied by a caller.
#[derive(Debug, Clone)]
pub enum MaterialInput {
    Bytes(Vec<u8>),
    /// Plain text; `file://` references are read from disk under the
    /// configured material root.
    Text(String),
    File(PathBuf),
}

impl MaterialInput {
    /// Classify a text input, turning `file://...` into a file reference.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match strip_file_scheme(&text) {
            Some(path) => MaterialInput::File(PathBuf::from(path)),
            None => MaterialInput::Text(text),
        }
    }

    /// Resolve the input to raw bytes. File references are only honoured
    /// inside `file_root` and are read on the blocking pool; without a root
    /// they are refused.
    pub async fn into_bytes(
        self,
        file_root: Option<&Path>,
    ) -> Result<Vec<u8>, MaterialInputError> {
        let bytes = match self {
            MaterialInput::Bytes(bytes) => bytes,
            MaterialInput::Text(text) => match strip_file_scheme(&text) {
                Some(path) => read_file(PathBuf::from(path), file_root).await?,
                None => text.into_bytes(),
            },
            MaterialInput::File(path) => read_file(path, file_root).await?,
        };

        if bytes.is_empty() {
            return Err(MaterialInputError::Empty);
        }
        Ok(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MaterialInputError {
    #[error("material is empty")]
    Empty,

    #[error("cannot read material file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("file references are not accepted")]
    FilesDisabled,

    #[error("material file {0} is outside the allowed directory")]
    OutsideRoot(String),
}

fn strip_file_scheme(text: &str) -> Option<&str> {
    let prefix = text.get(..FILE_SCHEME.len())?;
    if prefix.eq_ignore_ascii_case(FILE_SCHEME) {
        Some(&text[FILE_SCHEME.len()..])
    } else {
        None
    }
}

fn unreadable(path: &Path, reason: impl std::fmt::Display) -> MaterialInputError {
    MaterialInputError::Unreadable {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Read `path` after resolving symlinks and `..`; the resolved file must
/// sit under the resolved `root`.
fn read_confined(path: &Path, root: &Path) -> Result<Vec<u8>, MaterialInputError> {
    let root = root.canonicalize().map_err(|e| unreadable(root, e))?;
    let resolved = path.canonicalize().map_err(|e| unreadable(path, e))?;
    if !resolved.starts_with(&root) {
        return Err(MaterialInputError::OutsideRoot(path.display().to_string()));
    }
    std::fs::read(&resolved).map_err(|e| unreadable(path, e))
}

async fn read_file(path: PathBuf, root: Option<&Path>) -> Result<Vec<u8>, MaterialInputError> {
    let Some(root) = root.map(Path::to_path_buf) else {
        tracing::warn!(path = %path.display(), "File reference refused, no material root configured");
        return Err(MaterialInputError::FilesDisabled);
    };

    let shown = path.clone();
    tokio::task::spawn_blocking(move || read_confined(&path, &root))
        .await
        .map_err(|e| unreadable(&shown, e))?
}

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";

const OFFICE_PARTS: &[(&str, &str)] = &[
    (
        "word/",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        "xl/",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        "ppt/",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
];

const OPEN_DOCUMENT_TYPES: &[&str] = &[
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
];

/// Name and payload of every local file header in a ZIP archive. Headers
/// are located by signature so entries written with data descriptors are
/// still seen.
fn zip_entries(bytes: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        while offset + 30 <= bytes.len() {
            let start = offset;
            offset += 1;
            if &bytes[start..start + 4] != ZIP_LOCAL_HEADER {
                continue;
            }
            let field = |at: usize| u16::from_le_bytes([bytes[start + at], bytes[start + at + 1]]) as usize;
            let name_start = start + 30;
            let name_end = name_start + field(26);
            let data_start = name_end + field(28);
            if data_start > bytes.len() {
                return None;
            }
            offset = name_end;
            return Some((&bytes[name_start..name_end], &bytes[data_start..]));
        }
        None
    })
}

/// Office Open XML and OpenDocument files are ZIP archives; tell them apart
/// by their entries and fall back to plain ZIP.
fn sniff_zip(bytes: &[u8]) -> &'static str {
    for (name, data) in zip_entries(bytes) {
        if name == b"mimetype" {
            if let Some(mime) = OPEN_DOCUMENT_TYPES
                .iter()
                .find(|mime| data.starts_with(mime.as_bytes()))
            {
                return *mime;
            }
        }
        if let Some((_, mime)) = OFFICE_PARTS
            .iter()
            .find(|(dir, _)| name.starts_with(dir.as_bytes()))
        {
            return *mime;
        }
    }
    "application/zip"
}

/// Guess the MIME type from leading magic numbers. Valid UTF-8 without NUL
/// bytes is treated as plain text.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
    ];

    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| bytes.starts_with(magic)) {
        return Some(*mime);
    }

    if bytes.starts_with(ZIP_LOCAL_HEADER) {
        return Some(sniff_zip(bytes));
    }

    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    if !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
        return Some("text/plain");
    }

    None
}

/// Merge consecutive fragments until each chunk holds at least `min_chars`
/// characters. The final chunk may be shorter. An upstream error is passed
/// through and ends the stream; text buffered before it is discarded.
pub fn coalesce(stream: FragmentStream, min_chars: usize) -> FragmentStream {
    struct State {
        inner: FragmentStream,
        done: bool,
    }

    let state = State {
        inner: stream,
        done: false,
    };

    Box::pin(futures::stream::unfold(state, move |mut state| async move {
        if state.done {
            return None;
        }

        let mut chunk = String::new();
        let mut chars = 0usize;

        loop {
            match state.inner.next().await {
                Some(Ok(fragment)) => {
                    chars += fragment.chars().count();
                    chunk.push_str(&fragment);
                    if chars >= min_chars && !chunk.is_empty() {
                        return Some((Ok(chunk), state));
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err::<String, ProviderError>(e), state));
                }
                None => {
                    state.done = true;
                    if chunk.is_empty() {
                        return None;
                    }
                    return Some((Ok(chunk), state));
                }
            }
        }
    }))
}
