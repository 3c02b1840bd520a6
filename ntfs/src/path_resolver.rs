// Path resolution: component-by-component directory lookups from the root
// record, with a cache of already-resolved paths.

use std::collections::HashMap;

use log::trace;
use relic_core::RelicError;

use crate::index::DirectoryIndex;
use crate::mft::Mft;
use crate::record::FileRecord;
use crate::structures::MFT_RECORD_ROOT;

#[derive(Default)]
pub struct PathResolver {
    /// Normalized path -> file reference of the resolved record.
    cache: HashMap<String, u64>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse separators (both kinds), `.` and `..` into a canonical
    /// absolute path.
    pub fn normalize(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for component in path.split(['/', '\\']) {
            match component {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    /// Walk `path` from the root directory. `Ok(None)` means a component is
    /// absent; a non-directory in the middle of the path is an input error.
    pub fn resolve(
        &mut self,
        mft: &Mft<'_>,
        path: &str,
    ) -> Result<Option<FileRecord>, RelicError> {
        let normalized = Self::normalize(path);
        if let Some(&reference) = self.cache.get(&normalized) {
            trace!("path cache hit for {}", normalized);
            return mft.get_file_record(reference).map(Some);
        }

        let mut record = mft.get_file_record(MFT_RECORD_ROOT)?;
        if normalized != "/" {
            for component in normalized[1..].split('/') {
                let index = DirectoryIndex::open(
                    mft.partition(),
                    mft.pool(),
                    mft.geometry(),
                    &record,
                )?;
                let Some(entry) = index.lookup(component)? else {
                    trace!("{}: component {:?} not found", normalized, component);
                    return Ok(None);
                };
                record = mft.get_file_record(entry.reference)?;
            }
        }
        self.cache.insert(normalized, record.reference());
        Ok(Some(record))
    }
}
