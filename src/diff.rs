//! Sorted-snapshot differ.
//!
//! Given the previously transmitted sorted resource list and the freshly
//! sorted declaration, produce the minimal run of splice edits that turns the
//! former into the latter. Both inputs share one total order, so a single
//! merge walk finds every difference; no quadratic LCS is needed.
//!
//! Splice `start` indices are expressed against progressively mutated state:
//! applying the splices one by one, left to right, yields the new list. The
//! mirror applies them with exactly those semantics.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Splice<T> {
    pub start: usize,
    pub delete_count: usize,
    pub items: Vec<T>,
}

impl<T> Splice<T> {
    pub fn is_empty(&self) -> bool {
        self.delete_count == 0 && self.items.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpliceError {
    #[error("splice start {start} out of bounds (len {len})")]
    StartOutOfBounds { start: usize, len: usize },
    #[error("splice deletes {delete_count} at {start} past end (len {len})")]
    DeletePastEnd {
        start: usize,
        delete_count: usize,
        len: usize,
    },
}

/// Diff two lists that are both sorted under `cmp`.
///
/// Equal runs contribute nothing; each maximal differing run becomes one
/// splice combining its deletions and insertions. Diffing a list against an
/// identical one returns an empty vec.
pub fn sorted_diff<T: Clone>(
    old: &[T],
    new: &[T],
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Vec<Splice<T>> {
    let mut splices = Vec::new();
    let mut i = 0;
    let mut j = 0;
    // Tracks how far indices into `old` have drifted after earlier splices.
    let mut offset: isize = 0;

    while i < old.len() || j < new.len() {
        if i < old.len() && j < new.len() && cmp(&old[i], &new[j]) == Ordering::Equal {
            i += 1;
            j += 1;
            continue;
        }

        let run_start = i;
        let mut delete_count = 0;
        let mut items = Vec::new();
        loop {
            match (old.get(i), new.get(j)) {
                (Some(o), Some(n)) => match cmp(o, n) {
                    Ordering::Less => {
                        delete_count += 1;
                        i += 1;
                    }
                    Ordering::Greater => {
                        items.push(n.clone());
                        j += 1;
                    }
                    Ordering::Equal => break,
                },
                (Some(_), None) => {
                    delete_count += 1;
                    i += 1;
                }
                (None, Some(n)) => {
                    items.push(n.clone());
                    j += 1;
                }
                (None, None) => break,
            }
        }

        let inserted = items.len() as isize;
        splices.push(Splice {
            start: (run_start as isize + offset) as usize,
            delete_count,
            items,
        });
        offset += inserted - delete_count as isize;
    }

    splices
}

/// Sequentially apply `splices` to `target`, validating bounds before each
/// edit. On error the target keeps every splice applied so far; the caller
/// decides whether to abort the surrounding batch.
pub fn apply_splices<T: Clone>(target: &mut Vec<T>, splices: &[Splice<T>]) -> Result<(), SpliceError> {
    for splice in splices {
        let len = target.len();
        if splice.start > len {
            return Err(SpliceError::StartOutOfBounds {
                start: splice.start,
                len,
            });
        }
        if splice.start + splice.delete_count > len {
            return Err(SpliceError::DeletePastEnd {
                start: splice.start,
                delete_count: splice.delete_count,
                len,
            });
        }
        target.splice(
            splice.start..splice.start + splice.delete_count,
            splice.items.iter().cloned(),
        );
    }
    Ok(())
}
