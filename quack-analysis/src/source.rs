use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: SourceId,
    pub path: PathBuf,
    pub contents: String,
}

impl SourceFile {
    pub fn new(id: SourceId, path: PathBuf, contents: String) -> Self {
        Self { id, path, contents }
    }

    /// Module name derived from the file stem (`pkg/shapes.qk` -> `shapes`).
    pub fn module_name(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("module{}", self.id.0))
    }

    /// One-based line lookup used when rendering diagnostics.
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|index| self.contents.lines().nth(index))
    }
}
