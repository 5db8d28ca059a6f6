//! Corruption localization.
//!
//! Given a packet that validated and a variant of the same index that did
//! not, find where the variant diverges. The alignment is a greedy single
//! pass over the good packet and is advisory only: it explains a failure
//! in a log, it never repairs data.

/// A divergent span in the good packet's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Region {
    /// Offset of the first divergent byte.
    pub start: usize,
    /// Number of divergent bytes.
    pub len: usize,
}

const WINDOW: usize = 4;

fn window(bytes: &[u8], at: usize) -> &[u8] {
    let start = at.min(bytes.len());
    let end = (at + WINDOW).min(bytes.len());
    &bytes[start..end]
}

/// Align `bad` against `good` and return the regions of `good` that have
/// no counterpart in `bad`.
///
/// For each position `j` in `good`, with a cursor `k` into `bad`:
/// a matching 4-byte window advances `k` and closes any open region at
/// `j`; a matching single byte only advances `k`; anything else opens a
/// region at `j` (or extends the open one). A region still open at the
/// end runs to the end of `good`.
pub fn localize(good: &[u8], bad: &[u8]) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut open: Option<usize> = None;
    let mut k = 0usize;

    for j in 0..good.len() {
        if window(bad, k) == window(good, j) {
            k += 1;
            if let Some(start) = open.take() {
                regions.push(Region {
                    start,
                    len: j - start,
                });
            }
        } else if bad.get(k) == Some(&good[j]) {
            k += 1;
        } else if open.is_none() {
            open = Some(j);
        }
    }

    if let Some(start) = open {
        regions.push(Region {
            start,
            len: good.len() - start,
        });
    }
    regions
}

/// Two-line hex view of `good` around `region`: the first line shows
/// `context` bytes either side plus the region itself, the second blanks
/// the region out and ends with its length.
pub fn render_region(good: &[u8], region: Region, context: usize) -> String {
    let region_start = region.start.min(good.len());
    let region_end = (region_start + region.len).min(good.len());
    let start = region_start.saturating_sub(context);
    let end = (region_end + context).min(good.len());

    let full: Vec<String> = good[start..end].iter().map(|b| format!("{b:02X}")).collect();

    let mut blanked: Vec<String> = Vec::with_capacity(end - start + 1);
    blanked.extend(good[start..region_start].iter().map(|b| format!("{b:02X}")));
    blanked.extend((region_start..region_end).map(|_| "  ".to_string()));
    blanked.extend(good[region_end..end].iter().map(|b| format!("{b:02X}")));
    blanked.push(region.len.to_string());

    format!("{}\n{}", full.join(" "), blanked.join(" "))
}
