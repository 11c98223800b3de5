//! File type detection and parser selection.

use crate::db::{FileType, ParserType};

use super::naming::suffix;

const TEXT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "yml", "xml", "htm", "json", "csv", "txt", "ini", "xls", "xlsx", "wps",
    "rtf", "hlp", "numbers", "key", "md", "py", "js", "java", "c", "cpp", "h", "php", "go", "ts",
    "sh", "cs", "kt", "html", "sql",
];

const PRESENTATION_EXTENSIONS: &[&str] = &["ppt", "pptx", "pages"];

const EMAIL_EXTENSIONS: &[&str] = &["eml"];

const AURAL_EXTENSIONS: &[&str] = &[
    "wav", "flac", "ape", "alac", "wavpack", "wv", "mp3", "aac", "ogg", "vorbis", "opus",
];

const VISUAL_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "tif", "gif", "pcx", "tga", "exif", "fpx", "svg", "psd", "cdr", "pcd",
    "dxf", "ufo", "eps", "ai", "raw", "wmf", "webp", "avif", "apng", "icon", "ico", "mpg", "mpeg",
    "avi", "rm", "rmvb", "mov", "wmv", "asf", "dat", "asx", "wvx", "mpe", "mpa", "mp4",
];

/// Classify a file by its (case-insensitive) extension
pub(crate) fn filename_type(filename: &str) -> FileType {
    let ext = suffix(filename);
    let ext = ext.as_str();
    if TEXT_EXTENSIONS.contains(&ext) {
        FileType::Text
    } else if PRESENTATION_EXTENSIONS.contains(&ext) {
        FileType::Presentation
    } else if EMAIL_EXTENSIONS.contains(&ext) {
        FileType::Email
    } else if AURAL_EXTENSIONS.contains(&ext) {
        FileType::Aural
    } else if VISUAL_EXTENSIONS.contains(&ext) {
        FileType::Visual
    } else {
        FileType::Other
    }
}

/// Whether the name marks a presentation, whose parser is fixed
pub(crate) fn is_presentation_name(filename: &str) -> bool {
    PRESENTATION_EXTENSIONS.contains(&suffix(filename).as_str())
}

/// Parser forced by the file type, if any; otherwise the KB default applies
pub(crate) fn forced_parser(file_type: FileType, filename: &str) -> Option<ParserType> {
    match file_type {
        FileType::Visual => Some(ParserType::Picture),
        FileType::Aural => Some(ParserType::Audio),
        FileType::Email => Some(ParserType::Email),
        _ if is_presentation_name(filename) => Some(ParserType::Presentation),
        _ => None,
    }
}

/// Parser for a new document in a knowledge base with `kb_parser` default
pub(crate) fn parser_for(file_type: FileType, filename: &str, kb_parser: &str) -> String {
    forced_parser(file_type, filename)
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| kb_parser.to_string())
}
