//! Core data models shared by the loader, index builder, and query handler.
//!
//! These types describe the uploaded files, the chunks derived from them,
//! the department metadata stamped on every chunk, and the answer shapes
//! returned to the chat host.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// MIME type for plain text uploads.
pub const MIME_TEXT: &str = "text/plain";
/// MIME type for PDF uploads.
pub const MIME_PDF: &str = "application/pdf";
/// MIME type for CSV uploads.
pub const MIME_CSV: &str = "text/csv";

/// Stored value for chunks visible to every department.
pub const UNRESTRICTED: &str = "unrestricted";

/// A file received from the chat host. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content,
        }
    }

    /// Size of the raw content in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// The supported upload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Text,
    Pdf,
    Csv,
}

impl FileKind {
    pub const ALL: [FileKind; 3] = [FileKind::Text, FileKind::Pdf, FileKind::Csv];

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            MIME_TEXT => Some(FileKind::Text),
            MIME_PDF => Some(FileKind::Pdf),
            MIME_CSV => Some(FileKind::Csv),
            _ => None,
        }
    }

    /// Guess the kind from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "md" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            "csv" => Some(FileKind::Csv),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            FileKind::Text => MIME_TEXT,
            FileKind::Pdf => MIME_PDF,
            FileKind::Csv => MIME_CSV,
        }
    }
}

/// Department scoping for a batch of chunks.
///
/// Serialized as the string `"unrestricted"` or as a JSON array of
/// department names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Departments {
    #[default]
    Unrestricted,
    Restricted(Vec<String>),
}

impl Departments {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Departments::Unrestricted)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Departments::Unrestricted => serde_json::Value::String(UNRESTRICTED.to_string()),
            Departments::Restricted(names) => serde_json::json!(names),
        }
    }
}

impl Serialize for Departments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Departments::Unrestricted => serializer.serialize_str(UNRESTRICTED),
            Departments::Restricted(names) => names.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DepartmentsRepr {
    Sentinel(String),
    Names(Vec<String>),
}

impl<'de> Deserialize<'de> for Departments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match DepartmentsRepr::deserialize(deserializer)? {
            DepartmentsRepr::Sentinel(s) if s == UNRESTRICTED => Ok(Departments::Unrestricted),
            DepartmentsRepr::Sentinel(s) => Err(serde::de::Error::custom(format!(
                "expected \"{}\" or a list of departments, got \"{}\"",
                UNRESTRICTED, s
            ))),
            DepartmentsRepr::Names(names) => Ok(Departments::Restricted(names)),
        }
    }
}

/// Per-session metadata chosen once per upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub departments: Departments,
}

/// A bounded span of text from one uploaded file.
///
/// `source_id` has the form `source_<i>` and is unique within one
/// processing batch only; it is not stable across re-uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_id: String,
    pub departments: Departments,
    pub file_name: String,
    pub text: String,
}

impl Chunk {
    /// Metadata stored next to the chunk's embedding in the vector index.
    pub fn metadata_json(&self) -> serde_json::Value {
        serde_json::json!({
            "source": self.source_id,
            "departments": self.departments.to_json(),
            "file_name": self.file_name,
            "text": self.text,
        })
    }
}

/// Raw `{answer, sources}` pair produced by the retrieval chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainOutput {
    pub answer: String,
    pub sources: String,
}

/// A citation panel shown next to an answer, named after its source id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub name: String,
    pub content: String,
}

/// Final answer with the sources suffix applied and matched citations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub found_sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn departments_serialize_sentinel_and_list() {
        let meta = SessionMetadata {
            departments: Departments::Unrestricted,
        };
        assert_eq!(
            serde_json::to_value(&meta).unwrap(),
            serde_json::json!({"departments": "unrestricted"})
        );

        let meta = SessionMetadata {
            departments: Departments::Restricted(vec!["DevOps".into()]),
        };
        assert_eq!(
            serde_json::to_value(&meta).unwrap(),
            serde_json::json!({"departments": ["DevOps"]})
        );
    }

    #[test]
    fn departments_deserialize() {
        let d: Departments = serde_json::from_str("\"unrestricted\"").unwrap();
        assert!(d.is_unrestricted());
        let d: Departments = serde_json::from_str("[\"DevOps\",\"Data management\"]").unwrap();
        assert_eq!(
            d,
            Departments::Restricted(vec!["DevOps".into(), "Data management".into()])
        );
        assert!(serde_json::from_str::<Departments>("\"everyone\"").is_err());
    }

    #[test]
    fn file_kind_mapping() {
        assert_eq!(FileKind::from_mime("text/plain"), Some(FileKind::Text));
        assert_eq!(FileKind::from_mime("application/pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_mime("text/csv"), Some(FileKind::Csv));
        assert_eq!(FileKind::from_mime("image/png"), None);
        assert_eq!(FileKind::from_extension("PDF"), Some(FileKind::Pdf));
        for kind in FileKind::ALL {
            assert_eq!(FileKind::from_mime(kind.mime()), Some(kind));
        }
    }

    #[test]
    fn chunk_metadata_carries_text_and_tags() {
        let chunk = Chunk {
            source_id: "source_0".into(),
            departments: Departments::Restricted(vec!["DevOps".into()]),
            file_name: "notes.txt".into(),
            text: "hello".into(),
        };
        let meta = chunk.metadata_json();
        assert_eq!(meta["source"], "source_0");
        assert_eq!(meta["departments"], serde_json::json!(["DevOps"]));
        assert_eq!(meta["text"], "hello");
    }
}
