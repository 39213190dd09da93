use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the extraction dispatcher knows how to handle.
const SUPPORTED_EXTENSIONS: [&str; 18] = [
    "pdf", "txt", "md", "ipynb", "pptx", "ppt", "py", "js", "ts", "java", "cpp", "c", "cs",
    "sql", "r", "go", "rs", "json",
];

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.iter().any(|known| *known == lowered)
        })
        .unwrap_or(false)
}

/// Walks a course directory and returns every ingestable file, sorted
/// for a stable ingestion order. Hidden files and directories are
/// skipped; unreadable entries are silently dropped.
pub fn discover_course_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported(path))
        .collect();

    files.sort();
    files
}
