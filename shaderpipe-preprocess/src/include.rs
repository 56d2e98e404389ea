use crate::PreprocessError;
use shaderpipe_common::map::{FastHashMap, FastHashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves dotted include keys like `fluid.fs.header` against a set of
/// search roots and caches the named sections of every file it reads.
///
/// A shader file may contain zero or more sections delimited by lines
/// matching `-- <name>`; a section's body runs to the next marker or EOF.
/// Files are parsed once per process: later lookups of any section of an
/// already-loaded file are served from the cache, never re-read.
///
/// The cache is shared mutable state; the Includer is not safe for
/// concurrent mutation and callers must serialize access if it is used
/// from multiple threads.
#[derive(Debug, Default)]
pub struct Includer {
    search_roots: Vec<PathBuf>,
    sections: FastHashMap<String, String>,
    loaded: FastHashSet<PathBuf>,
    last_error: Option<PreprocessError>,
}

struct Resolved {
    path: PathBuf,
    file_key: String,
    section: String,
}

impl Includer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a search root. Roots are tried in registration order.
    pub fn add_include_path(&mut self, path: impl AsRef<Path>) -> Result<(), PreprocessError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PreprocessError::IncludePathNotFound(path.to_path_buf()));
        }
        self.search_roots.push(path.to_path_buf());
        Ok(())
    }

    /// The error recorded by the most recent failed [`include`](Self::include).
    pub fn last_error(&self) -> Option<&PreprocessError> {
        self.last_error.as_ref()
    }

    /// Resolves a key without reading any file content, to distinguish
    /// "this token is an include key" from "this is literal code".
    pub fn is_key_valid(&self, key: &str) -> bool {
        if key.contains('\n') || key.contains('#') || !key.contains('.') {
            return false;
        }
        self.resolve(key).is_some()
    }

    /// Returns the cached section identified by `key`, loading and
    /// splitting its file on first access. Failure returns an empty
    /// string and records a retrievable error; this never raises.
    pub fn include(&mut self, key: &str) -> &str {
        self.last_error = None;
        if !self.sections.contains_key(key) {
            if let Err(err) = self.load_for(key) {
                self.last_error = Some(err);
                return "";
            }
        }
        self.sections.get(key).map_or("", String::as_str)
    }

    /// Walks each search root segment by segment: `segment.glsl` as a
    /// file ends the walk (remaining segments name a section), `segment`
    /// as a sub-directory descends, anything else abandons the root.
    fn resolve(&self, key: &str) -> Option<Resolved> {
        let segments: Vec<&str> = key.split('.').collect();
        for root in &self.search_roots {
            let mut dir = root.clone();
            let mut file_key = String::new();
            for (index, segment) in segments.iter().enumerate() {
                if !file_key.is_empty() {
                    file_key.push('.');
                }
                file_key.push_str(segment);

                let candidate = dir.join(format!("{segment}.glsl"));
                if candidate.is_file() {
                    return Some(Resolved {
                        path: candidate,
                        file_key,
                        section: segments[index + 1..].join("."),
                    });
                }
                let subdir = dir.join(segment);
                if subdir.is_dir() {
                    dir = subdir;
                } else {
                    break;
                }
            }
        }
        None
    }

    fn load_for(&mut self, key: &str) -> Result<(), PreprocessError> {
        let resolved = self
            .resolve(key)
            .ok_or_else(|| PreprocessError::UnresolvedKey(key.to_string()))?;
        if self.loaded.contains(&resolved.path) {
            // file already split; the requested section does not exist
            return Err(PreprocessError::MissingSection {
                section: resolved.section,
                path: resolved.path,
            });
        }

        let content = fs::read_to_string(&resolved.path)
            .map_err(|e| PreprocessError::IOError(resolved.path.clone(), e))?;
        split_sections(&resolved.file_key, &content, &mut self.sections);
        self.loaded.insert(resolved.path.clone());

        if self.sections.contains_key(key) {
            Ok(())
        } else {
            Err(PreprocessError::MissingSection {
                section: resolved.section,
                path: resolved.path,
            })
        }
    }
}

/// Splits file content on `-- <name>` marker lines, caching each slice
/// under `<fileKey>.<name>`. Content before the first marker belongs to
/// no section and is dropped.
fn split_sections(file_key: &str, content: &str, sections: &mut FastHashMap<String, String>) {
    let mut active: Option<String> = None;
    let mut body = String::new();
    for line in content.lines() {
        if let Some(name) = section_marker(line) {
            if let Some(section) = active.take() {
                sections
                    .entry(format!("{file_key}.{section}"))
                    .or_insert_with(|| std::mem::take(&mut body));
            }
            body.clear();
            active = Some(name.to_string());
        } else if active.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some(section) = active {
        sections
            .entry(format!("{file_key}.{section}"))
            .or_insert(body);
    }
}

/// Matches a section marker line `-- <name>` where
/// `name = [a-zA-Z][a-zA-Z0-9_.\-]*`, with surrounding whitespace allowed.
fn section_marker(line: &str) -> Option<&str> {
    let name = line.trim_start().strip_prefix("-- ")?.trim_end();
    let mut chars = name.chars();
    if !chars.next()?.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        Some(name)
    } else {
        None
    }
}
