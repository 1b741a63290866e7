//! Per-directory dual index of entries.

use std::collections::BTreeMap;

use super::handle::HandleId;
use super::GraphError;

/// The (name, ordinal, child) association stored in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub name: String,
    pub ordinal: u64,
    pub child: HandleId,
}

/// Children of a directory, indexed twice: by name for lookups and by
/// insertion ordinal for resumable enumeration.
///
/// Ordinals come from a counter that only moves forward, so an ordinal is
/// never handed out twice in the directory's lifetime.
#[derive(Debug, Default)]
pub struct Directory {
    by_name: BTreeMap<String, u64>,
    by_ordinal: BTreeMap<u64, Dirent>,
    next_ordinal: u64,
    populated: bool,
}

impl Directory {
    /// Number of children.
    pub fn len(&self) -> usize {
        self.by_ordinal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ordinal.is_empty()
    }

    pub fn next_ordinal(&self) -> u64 {
        self.next_ordinal
    }

    /// Whether a full listing of this directory has been merged at least once.
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub(crate) fn set_populated(&mut self) {
        self.populated = true;
    }

    pub fn get(&self, name: &str) -> Option<&Dirent> {
        self.by_name
            .get(name)
            .and_then(|ordinal| self.by_ordinal.get(ordinal))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn at(&self, ordinal: u64) -> Option<&Dirent> {
        self.by_ordinal.get(&ordinal)
    }

    /// Entries in ordinal order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Dirent> {
        self.by_ordinal.values()
    }

    /// Entries with an ordinal of at least `start`, in ordinal order.
    pub fn from_ordinal(&self, start: u64) -> impl Iterator<Item = &Dirent> {
        self.by_ordinal.range(start..).map(|(_, d)| d)
    }

    pub(crate) fn insert(&mut self, name: &str, child: HandleId) -> Result<u64, GraphError> {
        if self.by_name.contains_key(name) {
            return Err(GraphError::NameConflict {
                name: name.to_string(),
            });
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.by_name.insert(name.to_string(), ordinal);
        self.by_ordinal.insert(
            ordinal,
            Dirent {
                name: name.to_string(),
                ordinal,
                child,
            },
        );
        Ok(ordinal)
    }

    pub(crate) fn remove(&mut self, ordinal: u64) -> Option<Dirent> {
        let dirent = self.by_ordinal.remove(&ordinal)?;
        self.by_name.remove(&dirent.name);
        Some(dirent)
    }

    /// Both indexes hold the same dirents and no ordinal is ahead of the
    /// counter.
    pub(crate) fn check(&self) -> Result<(), String> {
        if self.by_name.len() != self.by_ordinal.len() {
            return Err(format!(
                "name index has {} entries, ordinal index has {}",
                self.by_name.len(),
                self.by_ordinal.len()
            ));
        }
        for (name, ordinal) in &self.by_name {
            match self.by_ordinal.get(ordinal) {
                Some(d) if &d.name == name && d.ordinal == *ordinal => {}
                _ => return Err(format!("'{}' -> {} has no matching dirent", name, ordinal)),
            }
        }
        if let Some((&last, _)) = self.by_ordinal.last_key_value() {
            if last >= self.next_ordinal {
                return Err(format!(
                    "ordinal {} not below counter {}",
                    last, self.next_ordinal
                ));
            }
        }
        Ok(())
    }
}
