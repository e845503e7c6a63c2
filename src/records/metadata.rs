//! # File Metadata
//!
//! An optional metadata chunk may follow the signature, carrying a
//! serialized [`RecordsMetadata`] message: the fully-qualified name of the
//! record type and the file descriptors needed to interpret it. Readers
//! that know the schema can ignore it; readers that do not can reconstruct
//! the record type's descriptor from the embedded files.

use prost::Message;
use prost_types::{DescriptorProto, FileDescriptorProto};

/// Contents of the file metadata chunk.
#[derive(Clone, PartialEq, Message)]
pub struct RecordsMetadata {
    /// Fully-qualified record type name, e.g. `pkg.LogEntry`.
    #[prost(string, optional, tag = "1")]
    pub record_type_name: Option<String>,
    /// File descriptors defining the record type and its dependencies.
    #[prost(message, repeated, tag = "2")]
    pub file_descriptor: Vec<FileDescriptorProto>,
}

/// Resolves the record type named by a [`RecordsMetadata`] against its
/// embedded file descriptors.
#[derive(Debug, Default)]
pub struct RecordsMetadataDescriptors {
    record_type_name: String,
    files: Vec<FileDescriptorProto>,
}

impl RecordsMetadataDescriptors {
    pub fn new(metadata: &RecordsMetadata) -> Self {
        Self {
            record_type_name: metadata.record_type_name().to_string(),
            files: metadata.file_descriptor.clone(),
        }
    }

    pub fn record_type_name(&self) -> &str {
        &self.record_type_name
    }

    /// The descriptor of the record type, if the embedded files define it.
    pub fn descriptor(&self) -> Option<&DescriptorProto> {
        if self.record_type_name.is_empty() {
            return None;
        }
        self.find_message(&self.record_type_name)
    }

    /// Looks up a fully-qualified message name across the embedded files,
    /// descending into nested types.
    pub fn find_message(&self, full_name: &str) -> Option<&DescriptorProto> {
        for file in &self.files {
            let package = file.package.as_deref().unwrap_or_default();
            let relative = match strip_package(full_name, package) {
                Some(relative) => relative,
                None => continue,
            };
            let mut parts = relative.split('.');
            let first = parts.next()?;
            let mut message = file
                .message_type
                .iter()
                .find(|m| m.name.as_deref() == Some(first))?;
            for part in parts {
                message = message
                    .nested_type
                    .iter()
                    .find(|m| m.name.as_deref() == Some(part))?;
            }
            return Some(message);
        }
        None
    }
}

fn strip_package<'a>(full_name: &'a str, package: &str) -> Option<&'a str> {
    if package.is_empty() {
        return Some(full_name);
    }
    full_name
        .strip_prefix(package)
        .and_then(|rest| rest.strip_prefix('.'))
}
