//! Ingestion: partition documents, summarize elements, store processed/original pairs.

mod partition;
mod registry;
mod service;
mod summarize;

pub use partition::{
    GroupedElements, PartitionError, Partitioner, RawElement, RawMetadata, UnstructuredPartitioner,
    group_elements,
};
pub use registry::{Registry, RegistryError};
pub use service::{IngestError, IngestOutcome, IngestService};
pub use summarize::{
    IMAGE_REQUEST, OllamaSummarizer, SummarizationError, Summarizer, TABLE_PREAMBLE,
    TABLE_REQUEST, table_prompt,
};

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// PDF files at `root`: the file itself, or every `*.pdf` below a directory, sorted.
pub fn discover_documents(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut documents: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable path");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    documents.sort();
    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_pdfs_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("b.pdf"), b"").expect("write");
        std::fs::write(dir.path().join("nested/a.PDF"), b"").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"").expect("write");

        let found = discover_documents(dir.path());
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|path| path.extension().is_some()));
        assert_eq!(discover_documents(&dir.path().join("b.pdf")).len(), 1);
    }
}
