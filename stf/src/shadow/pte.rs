//! Shadow page table (spec §4.7 "PTE shadow"), grounded on the overlap and
//! eviction rules in `STF_PTE::UpdatePTE` (`stf_pte.hpp`).

use std::collections::{BTreeMap, BTreeSet};

use stf_format::{InitialPte, Record};
use stf_types::Word;

#[derive(Debug, Clone, PartialEq)]
struct PteEntry {
    pid: u32,
    pa: Word,
    page_size_log2: u32,
    first_use_index: u64,
    entries: Vec<u64>,
    used: bool,
}

/// Tracks every page-table entry a trace has walked, keyed by `(pid,
/// virtual page)`. Supports the three usage modes the rewriter facade
/// needs: dump-all, on-demand, and mark-only (spec §4.7).
#[derive(Debug, Clone)]
pub struct PteShadow {
    map: BTreeMap<(u32, Word), PteEntry>,
    page_sizes: BTreeMap<u32, BTreeSet<u32>>,
    /// When set, a lookup that misses under the requested pid falls back
    /// to any pid covering the same virtual page, instead of reporting no
    /// translation (spec §9 PID-mismatch tolerance; supplemented from
    /// `original_source`'s `ignore_pid_mismatch_` constructor flag).
    ignore_pid_mismatch: bool,
}

impl PteShadow {
    pub fn new(ignore_pid_mismatch: bool) -> Self {
        Self { map: BTreeMap::new(), page_sizes: BTreeMap::new(), ignore_pid_mismatch }
    }

    pub fn from_initial_ptes(ptes: &[InitialPte], pid: u32, ignore_pid_mismatch: bool) -> Self {
        let mut shadow = Self::new(ignore_pid_mismatch);
        for pte in ptes {
            shadow.update(pid, pte.va, pte.pa, pte.page_size_log2, pte.first_use_index, pte.entries.clone());
        }
        shadow
    }

    /// Folds a `PAGE_TABLE_WALK` record into the shadow (spec §4.7 "PTE
    /// update rules"): a new walk for an existing `(pid, vpage)` overwrites
    /// iff the pid or walk content differs, clearing `used`; a genuinely
    /// new vpage evicts any existing entries for this pid whose virtual
    /// range overlaps it at a different page size. Returns whether an
    /// unchanged, already-`used` entry existed (mirrors `UpdatePTE`'s bool
    /// return, used by `UpdateAndMarkPTE` to skip a redundant `MarkPTE`).
    pub fn update(
        &mut self,
        pid: u32,
        va: Word,
        pa: Word,
        page_size_log2: u32,
        first_use_index: u64,
        entries: Vec<u64>,
    ) -> bool {
        self.page_sizes.entry(pid).or_default().insert(page_size_log2);

        if let Some(existing) = self.map.get_mut(&(pid, va)) {
            let unchanged = existing.pid == pid
                && existing.pa == pa
                && existing.page_size_log2 == page_size_log2
                && existing.entries == entries;
            if !unchanged {
                existing.pid = pid;
                existing.pa = pa;
                existing.page_size_log2 = page_size_log2;
                existing.first_use_index = first_use_index;
                existing.entries = entries;
                existing.used = false;
            }
            return existing.used;
        }

        let new_size = 1u64 << page_size_log2;
        let new_end = va.wrapping_add(new_size);
        let overlapping: Vec<(u32, Word)> = self
            .map
            .iter()
            .filter(|(&(p, evpage), entry)| {
                if p != pid {
                    return false;
                }
                let esize = 1u64 << entry.page_size_log2;
                new_end > evpage && evpage.wrapping_add(esize) > va
            })
            .map(|(&k, _)| k)
            .collect();
        for key in overlapping {
            self.map.remove(&key);
        }

        self.map.insert(
            (pid, va),
            PteEntry { pid, pa, page_size_log2, first_use_index, entries, used: false },
        );
        false
    }

    fn lookup_key(&self, pid: u32, vaddr: Word) -> Option<(u32, Word)> {
        let sizes = self.page_sizes.get(&pid)?;
        for &log2 in sizes {
            let mask = (1u64 << log2) - 1;
            let vpage = vaddr & !mask;
            if self.map.contains_key(&(pid, vpage)) {
                return Some((pid, vpage));
            }
        }
        if self.ignore_pid_mismatch {
            for (&(p, vpage), entry) in &self.map {
                let mask = (1u64 << entry.page_size_log2) - 1;
                if vaddr & !mask == vpage {
                    return Some((p, vpage));
                }
            }
        }
        None
    }

    /// Translates `vaddr` under `pid` and marks the covering PTE used,
    /// returning `(physical address, was_newly_used)`. `None` if no PTE
    /// covers this page (spec §4.7 item 2 "on-demand").
    pub fn translate_and_mark(&mut self, pid: u32, vaddr: Word) -> Option<(Word, bool)> {
        let key = self.lookup_key(pid, vaddr)?;
        let entry = self.map.get_mut(&key).expect("lookup_key only returns present keys");
        let page_mask = (1u64 << entry.page_size_log2) - 1;
        let was_newly_used = !entry.used;
        entry.used = true;
        Some((entry.pa | (vaddr & page_mask), was_newly_used))
    }

    /// Marks the covering PTE used without translating (spec §4.7 item 3
    /// "mark-only": "was this virtual page ever translated?").
    pub fn mark_used(&mut self, pid: u32, vaddr: Word) -> bool {
        self.translate_and_mark(pid, vaddr).is_some()
    }

    /// Clears every `used` flag, starting a fresh on-demand pass (spec §4.7
    /// item 2 "clear all used flags").
    pub fn reset_used(&mut self) {
        for entry in self.map.values_mut() {
            entry.used = false;
        }
    }

    /// Every live PTE, for dump-all mode (spec §4.7 item 1).
    pub fn live_records(&self) -> Vec<Record> {
        self.map
            .iter()
            .map(|(&(_, va), entry)| Record::PageTableWalk {
                va,
                pa: entry.pa,
                page_size_log2: entry.page_size_log2,
                first_use_index: entry.first_use_index,
                entries: entry.entries.clone(),
            })
            .collect()
    }

    pub fn to_initial_ptes(&self) -> Vec<InitialPte> {
        self.map
            .iter()
            .map(|(&(_, va), entry)| InitialPte {
                va,
                pa: entry.pa,
                page_size_log2: entry.page_size_log2,
                first_use_index: entry.first_use_index,
                entries: entry.entries.clone(),
            })
            .collect()
    }

    /// If `(pid, vaddr)`'s covering PTE is not yet `used`, returns the
    /// record to emit and marks it used (spec §4.7 item 2).
    pub fn emit_if_unused(&mut self, pid: u32, vaddr: Word) -> Option<Record> {
        let key = self.lookup_key(pid, vaddr)?;
        let entry = self.map.get_mut(&key).expect("lookup_key only returns present keys");
        if entry.used {
            return None;
        }
        entry.used = true;
        Some(Record::PageTableWalk {
            va: key.1,
            pa: entry.pa,
            page_size_log2: entry.page_size_log2,
            first_use_index: entry.first_use_index,
            entries: entry.entries.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_in_place_when_content_differs() {
        let mut shadow = PteShadow::new(false);
        shadow.update(1, 0x1000, 0x8000_1000, 12, 0, vec![1]);
        shadow.translate_and_mark(1, 0x1000);
        let was_used = shadow.update(1, 0x1000, 0x8000_2000, 12, 1, vec![2]);
        assert!(!was_used, "differing content should have cleared the used flag");
    }

    #[test]
    fn unchanged_update_preserves_used_flag() {
        let mut shadow = PteShadow::new(false);
        shadow.update(1, 0x1000, 0x8000_1000, 12, 0, vec![1]);
        shadow.translate_and_mark(1, 0x1000);
        let still_used = shadow.update(1, 0x1000, 0x8000_1000, 12, 0, vec![1]);
        assert!(still_used);
    }

    #[test]
    fn overlapping_different_size_entry_evicts_existing() {
        let mut shadow = PteShadow::new(false);
        shadow.update(1, 0x1000, 0x8000_1000, 12, 0, vec![1]); // 4K page at 0x1000
        // 2M page starting at 0 covers 0x1000 too
        shadow.update(1, 0x0, 0x8000_0000, 21, 1, vec![2]);
        assert!(shadow.translate_and_mark(1, 0x1000).is_some());
        // the original 4K entry must be gone; only the 2M one remains
        assert_eq!(shadow.map.len(), 1);
    }

    #[test]
    fn translate_applies_page_offset() {
        let mut shadow = PteShadow::new(false);
        shadow.update(1, 0x1000, 0x8000_1000, 12, 0, vec![1]);
        let (pa, newly_used) = shadow.translate_and_mark(1, 0x1008).unwrap();
        assert_eq!(pa, 0x8000_1008);
        assert!(newly_used);
    }

    #[test]
    fn unmapped_page_has_no_translation() {
        let mut shadow = PteShadow::new(false);
        assert!(shadow.translate_and_mark(1, 0x9000).is_none());
    }

    #[test]
    fn ignore_pid_mismatch_falls_back_to_any_pid() {
        let mut shadow = PteShadow::new(true);
        shadow.update(7, 0x1000, 0x8000_1000, 12, 0, vec![1]);
        assert!(shadow.translate_and_mark(3, 0x1000).is_some());
    }

    #[test]
    fn strict_mode_rejects_pid_mismatch() {
        let mut shadow = PteShadow::new(false);
        shadow.update(7, 0x1000, 0x8000_1000, 12, 0, vec![1]);
        assert!(shadow.translate_and_mark(3, 0x1000).is_none());
    }

    #[test]
    fn emit_if_unused_marks_and_returns_once() {
        let mut shadow = PteShadow::new(false);
        shadow.update(1, 0x2000, 0x9000_2000, 12, 0, vec![5]);
        assert!(shadow.emit_if_unused(1, 0x2000).is_some());
        assert!(shadow.emit_if_unused(1, 0x2000).is_none());
    }
}
