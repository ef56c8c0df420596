//! Memory dumps: what is still allocated, what went wrong, and whether the
//! books balance.

use std::io::{self, Write};

use serde::Serialize;

use crate::{
    alloc::ledger::{AllocRecord, Ledger, SlotState},
    memcheck::Counters,
    memlog::timestamp,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// On demand, any number of times
    Snapshot,
    /// Once, at the end of the process
    Final,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub slot: usize,
    #[serde(flatten)]
    pub record: AllocRecord,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Recomputed from the ledger: the sum of every live allocation
    pub bytes_allocated: usize,
    /// The running counter. Should always equal `bytes_allocated`.
    pub tracked_bytes: usize,
    pub active_entries: usize,
    /// Ledger slots ever used
    pub max_entries: usize,
    pub peak_bytes: usize,
    pub mallocs: usize,
    pub reallocs: usize,
    /// Null frees/reallocs and frees/reallocs of unknown pointers
    pub bad_entries: usize,
    pub overruns: usize,
}

impl Summary {
    pub const fn is_consistent(&self) -> bool {
        self.bytes_allocated == self.tracked_bytes
    }

    /// Nothing leaked, nothing misused, nothing overrun
    pub const fn is_clean(&self) -> bool {
        self.bytes_allocated == 0
            && self.active_entries == 0
            && self.bad_entries == 0
            && self.overruns == 0
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub kind: ReportKind,
    pub banner: String,
    pub time: String,
    /// Live allocations, overruns and misuse records, in slot order
    pub entries: Vec<ReportEntry>,
    pub summary: Summary,
}

impl Report {
    pub fn build(kind: ReportKind, banner: &str, ledger: &Ledger, counters: &Counters) -> Self {
        let mut summary = Summary {
            tracked_bytes: counters.tracked_bytes,
            active_entries: counters.active_entries,
            max_entries: ledger.high_water(),
            peak_bytes: counters.peak_bytes,
            mallocs: counters.mallocs,
            reallocs: counters.reallocs,
            ..Summary::default()
        };
        let mut entries = Vec::new();
        for (slot, record) in ledger.records().iter().enumerate() {
            match record.state {
                SlotState::FreeSlot => continue,
                SlotState::Allocated => summary.bytes_allocated += record.size,
                SlotState::Overrun => summary.overruns += 1,
                _ => summary.bad_entries += 1,
            }
            entries.push(ReportEntry {
                slot,
                record: *record,
            });
        }
        Self {
            kind,
            banner: banner.to_owned(),
            time: timestamp(),
            entries,
            summary,
        }
    }

    /// Only meaningful for a final report, but answers the same question for
    /// a snapshot.
    pub const fn is_safe(&self) -> bool {
        self.summary.is_clean()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// The human readable dump, as it goes into the event log
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let last = self.kind == ReportKind::Final;
        let n = self.summary.max_entries;
        match self.kind {
            ReportKind::Final => writeln!(w, "\n---[ Memory dump for ({}) ]---\n", self.banner)?,
            ReportKind::Snapshot => writeln!(
                w,
                "\n---[ Memory dump for ({}) at {}]---\n",
                self.banner, self.time
            )?,
        }

        for ReportEntry { slot: i, record: r } in &self.entries {
            let (ptr, size, site) = (r.ptr, r.size, r.site);
            match r.state {
                SlotState::ReallocNull => {
                    writeln!(w, "null pointer to realloc(nil,{size})! at {site}")?;
                }
                SlotState::FreeNotAlloc => writeln!(
                    w,
                    "pointer not found in table to free({ptr:p}) [{i:3}:{n:3}], at {site}"
                )?,
                SlotState::ReallocNotAlloc => writeln!(
                    w,
                    "pointer not found in table to realloc({ptr:p}) [{i:3}:{n:3}] {size:4}, at {site}"
                )?,
                SlotState::FreeNull => writeln!(w, "null pointer to free(nil)! at {site}")?,
                SlotState::Overrun => {
                    writeln!(w, "{ptr:p} [{i:3}:{n:3}], {size:4} buffer overrun!:")?;
                    writeln!(w, " --> source of malloc: {site}")?;
                }
                SlotState::Allocated => {
                    let what = if last {
                        "not released!"
                    } else {
                        "currently_allocated"
                    };
                    writeln!(w, "{ptr:p} [{i:3}:{n:3}], {size:4} {what}:")?;
                    writeln!(w, " --> source of malloc/realloc: {site}")?;
                }
                SlotState::FreeSlot => {}
            }
        }

        let s = &self.summary;
        let what = if last { "not freed" } else { "allocated" };
        writeln!(w, "\n\n---[ Memory dump summary for ({}) ]---", self.banner)?;
        writeln!(w, "Total number of bytes {what}...: {}", s.bytes_allocated)?;
        writeln!(w, "Number of entries {what}.......: {}", s.active_entries)?;
        writeln!(w, "Maximum allocated entries.........: {}", s.max_entries)?;
        writeln!(w, "Maximum memory allocated..........: {}", s.peak_bytes)?;
        writeln!(w, "Number of mallocs.................: {}", s.mallocs)?;
        writeln!(w, "Number of reallocs................: {}", s.reallocs)?;
        writeln!(w, "Number of bad entries.............: {}", s.bad_entries)?;
        writeln!(w, "Number of buffer overrun..........: {}\n", s.overruns)?;
        if !s.is_consistent() {
            writeln!(
                w,
                "ERROR - sum of allocated {} != mem_allocated {}",
                s.bytes_allocated, s.tracked_bytes
            )?;
        }

        if last {
            if self.is_safe() {
                writeln!(w, "=> Program seems to be memory allocation safe...\n")?;
            } else {
                writeln!(w, "=> Program seems to have some memory problem !!!\n")?;
            }
        }
        Ok(())
    }
}
