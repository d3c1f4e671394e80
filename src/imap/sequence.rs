//! Sequence-set and UID-set parsing
//!
//! The two grammars look alike (`2`, `4:7`, `1:*`, comma-separated)
//! but resolve differently: sequence numbers are clamped into the live
//! `1..=count` range, while UID sets may name UIDs that no longer
//! exist -- those simply match nothing.

/// Parse a sequence set against the current message count. Returns
/// sorted, deduplicated sequence numbers; out-of-range entries are
/// clamped (single numbers beyond the count are dropped).
pub fn parse_sequence_set(input: &str, max_seq: usize) -> Result<Vec<usize>, String> {
    let mut sequences = Vec::new();
    if max_seq == 0 {
        // An empty folder matches nothing, but the set must still be
        // well-formed.
        validate_set_syntax(input)?;
        return Ok(sequences);
    }

    for part in input.split(',') {
        let part = part.trim();
        if let Some((start_raw, end_raw)) = part.split_once(':') {
            let start = resolve(start_raw, max_seq)?.clamp(1, max_seq);
            let end = resolve(end_raw, max_seq)?.clamp(1, max_seq);
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            sequences.extend(start..=end);
        } else {
            let seq = resolve(part, max_seq)?;
            if (1..=max_seq).contains(&seq) {
                sequences.push(seq);
            }
        }
    }
    sequences.sort_unstable();
    sequences.dedup();
    Ok(sequences)
}

fn resolve(raw: &str, max_seq: usize) -> Result<usize, String> {
    if raw == "*" {
        Ok(max_seq)
    } else {
        raw.parse()
            .map_err(|_| format!("invalid sequence set entry '{raw}'"))
    }
}

/// A parsed UID set, kept as ranges so `1:*` never materializes a
/// huge list; membership is tested against the live UIDs instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidSet {
    ranges: Vec<(u32, u32)>,
}

impl UidSet {
    /// Parse a UID set. `*` resolves to the highest assigned UID
    /// (`max_uid`); ranges may cover UIDs that do not exist.
    pub fn parse(input: &str, max_uid: u32) -> Result<Self, String> {
        let mut ranges = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if let Some((start_raw, end_raw)) = part.split_once(':') {
                let start = Self::resolve(start_raw, max_uid)?;
                let end = Self::resolve(end_raw, max_uid)?;
                ranges.push(if start <= end { (start, end) } else { (end, start) });
            } else {
                let uid = Self::resolve(part, max_uid)?;
                ranges.push((uid, uid));
            }
        }
        Ok(Self { ranges })
    }

    fn resolve(raw: &str, max_uid: u32) -> Result<u32, String> {
        if raw == "*" {
            Ok(max_uid)
        } else {
            raw.parse()
                .map_err(|_| format!("invalid UID set entry '{raw}'"))
        }
    }

    #[must_use]
    pub fn contains(&self, uid: u32) -> bool {
        self.ranges
            .iter()
            .any(|(start, end)| (*start..=*end).contains(&uid))
    }
}

fn validate_set_syntax(input: &str) -> Result<(), String> {
    for part in input.split(',') {
        for entry in part.trim().split(':') {
            if entry != "*" && entry.parse::<u64>().is_err() {
                return Err(format!("invalid sequence set entry '{entry}'"));
            }
        }
    }
    Ok(())
}
