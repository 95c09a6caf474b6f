use std::sync::Arc;

/// Supplies the extension a writer layer adds to an artifact name.
pub trait FileExtProvider {
    fn file_ext(&self) -> Option<Arc<str>>;
}

/// Appends the provider's extension (if any) to `base`.
pub fn with_file_ext<P: FileExtProvider + ?Sized>(base: &str, provider: &P) -> String {
    match provider.file_ext() {
        Some(ext) => format!("{base}.{ext}"),
        None => base.to_string(),
    }
}
