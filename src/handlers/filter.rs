//! File classification and download filtering shared by all handlers

use super::types::{DownloadOptions, FileType, MediaItem};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "flv", "wmv", "m4v"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx"];
pub const COMPRESSED_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz"];

/// Classify a filename by its (case-insensitive) extension
pub fn classify_filename(filename: &str) -> FileType {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return FileType::Other;
    };
    let ext = ext.to_ascii_lowercase();
    let ext = ext.as_str();

    if IMAGE_EXTENSIONS.contains(&ext) {
        FileType::Image
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        FileType::Video
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        FileType::Document
    } else if COMPRESSED_EXTENSIONS.contains(&ext) {
        FileType::Compressed
    } else {
        FileType::Other
    }
}

/// Decide whether an item passes the configured filters.
///
/// Checks run in order: type toggle, minimum size, maximum size, publish
/// date range. Unknown sizes and dates skip their checks.
pub fn should_download(options: &DownloadOptions, item: &MediaItem) -> bool {
    let allowed = match item.file_type {
        FileType::Image => options.download_images,
        FileType::Video => options.download_videos,
        FileType::Document => options.download_documents,
        FileType::Compressed => options.download_compressed,
        FileType::Other => true,
    };
    if !allowed {
        return false;
    }

    if let Some(size) = item.size {
        if options.min_file_size > 0 && size < options.min_file_size {
            return false;
        }
        if options.max_file_size > 0 && size > options.max_file_size {
            return false;
        }
    }

    if let Some(published) = item.published_date {
        if options.date_from.is_some_and(|from| published < from) {
            return false;
        }
        if options.date_to.is_some_and(|to| published > to) {
            return false;
        }
    }

    true
}

/// Replace characters that are invalid in filenames on common platforms
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}
