//! Immutable description of the set of cores a thread may run on.

use {
    crate::{
        affinity::{core_count, CPU_SETSIZE},
        error::CpuAffinityError,
    },
    std::{collections::BTreeSet, fmt, sync::Arc},
};

/// A non-empty set of core indices.
///
/// Descriptors are canonicalized on construction (sorted, deduplicated), so two
/// descriptors compare equal whenever they name the same cores, regardless of
/// whether they were built from a mask, a bit string or a range list. Cloning
/// is cheap and clones share the underlying storage.
///
/// # Examples
///
/// ```no_run
/// # use pinning_cpu_utils::*;
/// # fn main() -> Result<(), CpuAffinityError> {
/// let by_mask = AffinityDescriptor::from_mask(0b1011)?;
/// let by_text = AffinityDescriptor::from_text("1011")?;
/// let by_list = AffinityDescriptor::from_cpu_list("0-1,3")?;
/// assert_eq!(by_mask, by_text);
/// assert_eq!(by_text, by_list);
/// assert_eq!(by_mask.cores(), &[0, 1, 3]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AffinityDescriptor {
    cores: Arc<[usize]>,
}

impl AffinityDescriptor {
    /// Build a descriptor from explicit core indices. Duplicates are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CpuAffinityError::EmptyCpuList`] if no core is given and
    /// [`CpuAffinityError::InvalidCpu`] if any core is not below [`core_count`].
    pub fn from_cores(cores: impl IntoIterator<Item = usize>) -> Result<Self, CpuAffinityError> {
        Self::from_cores_within(cores, core_count()?)
    }

    /// Build a descriptor from a bitmask where bit `n` selects core `n`.
    ///
    /// # Errors
    ///
    /// Returns [`CpuAffinityError::EmptyCpuList`] for an all-zero mask and
    /// [`CpuAffinityError::InvalidCpu`] if a set bit is not below [`core_count`].
    pub fn from_mask(mask: u64) -> Result<Self, CpuAffinityError> {
        Self::from_mask_within(mask, core_count()?)
    }

    /// Parse a binary string, most significant bit first.
    ///
    /// The rightmost character is core 0, so `"1011"` selects cores 0, 1 and 3.
    /// Leading zeros are allowed.
    ///
    /// # Errors
    ///
    /// Returns [`CpuAffinityError::ParseError`] for an empty string or any
    /// character other than `0`/`1`, [`CpuAffinityError::EmptyCpuList`] if no
    /// bit is set and [`CpuAffinityError::InvalidCpu`] for out-of-range bits.
    pub fn from_text(bits: &str) -> Result<Self, CpuAffinityError> {
        Self::from_text_within(bits, core_count()?)
    }

    /// Parse a kernel style CPU range list such as `"0-3,5,7-9"`.
    ///
    /// # Errors
    ///
    /// Returns [`CpuAffinityError::ParseError`] on malformed or reversed ranges,
    /// otherwise the same errors as [`AffinityDescriptor::from_cores`].
    pub fn from_cpu_list(list: &str) -> Result<Self, CpuAffinityError> {
        Self::from_cpu_list_within(list, core_count()?)
    }

    /// Like [`AffinityDescriptor::from_cores`], validated against an explicit core count.
    pub fn from_cores_within(
        cores: impl IntoIterator<Item = usize>,
        core_count: usize,
    ) -> Result<Self, CpuAffinityError> {
        let cores: BTreeSet<usize> = cores.into_iter().collect();
        let descriptor = Self {
            cores: cores.into_iter().collect(),
        };
        descriptor.validate(core_count)?;
        Ok(descriptor)
    }

    /// Like [`AffinityDescriptor::from_mask`], validated against an explicit core count.
    pub fn from_mask_within(
        mask: u64,
        core_count: usize,
    ) -> Result<Self, CpuAffinityError> {
        let cores = (0..u64::BITS as usize).filter(|bit| mask & (1u64 << bit) != 0);
        Self::from_cores_within(cores, core_count)
    }

    /// Like [`AffinityDescriptor::from_text`], validated against an explicit core count.
    pub fn from_text_within(
        bits: &str,
        core_count: usize,
    ) -> Result<Self, CpuAffinityError> {
        if bits.is_empty() {
            return Err(CpuAffinityError::ParseError(
                "binary mask cannot be empty".to_string(),
            ));
        }
        let mut cores = Vec::new();
        for (core, bit) in bits.chars().rev().enumerate() {
            match bit {
                '0' => {}
                '1' => cores.push(core),
                other => {
                    return Err(CpuAffinityError::ParseError(format!(
                        "invalid character {other:?} in binary mask {bits:?}"
                    )))
                }
            }
        }
        Self::from_cores_within(cores, core_count)
    }

    /// Like [`AffinityDescriptor::from_cpu_list`], validated against an explicit core count.
    pub fn from_cpu_list_within(
        list: &str,
        core_count: usize,
    ) -> Result<Self, CpuAffinityError> {
        Self::from_cores_within(parse_cpu_range_list(list)?, core_count)
    }

    /// Check the descriptor against a platform core count.
    ///
    /// # Errors
    ///
    /// Returns [`CpuAffinityError::EmptyCpuList`] if the descriptor is empty and
    /// [`CpuAffinityError::InvalidCpu`] if any core is outside `0..core_count`.
    pub fn validate(&self, core_count: usize) -> Result<(), CpuAffinityError> {
        let max = core_count.min(CPU_SETSIZE).saturating_sub(1);
        match self.cores.last() {
            None => Err(CpuAffinityError::EmptyCpuList),
            Some(&cpu) if cpu > max || core_count == 0 => {
                Err(CpuAffinityError::InvalidCpu { cpu, max })
            }
            Some(_) => Ok(()),
        }
    }

    /// Sorted core indices.
    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    pub fn contains(&self, core: usize) -> bool {
        self.cores.binary_search(&core).is_ok()
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Always false for a validated descriptor.
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cores.iter().copied()
    }

    /// The descriptor as a bitmask, if every core fits in 64 bits.
    pub fn mask(&self) -> Option<u64> {
        self.cores.iter().try_fold(0u64, |mask, &core| {
            let bit = u32::try_from(core).ok()?;
            Some(mask | 1u64.checked_shl(bit)?)
        })
    }

    /// Canonical binary rendering, the inverse of [`AffinityDescriptor::from_text`].
    pub fn to_text(&self) -> String {
        let Some(&highest) = self.cores.last() else {
            return String::new();
        };
        (0..=highest)
            .rev()
            .map(|core| if self.contains(core) { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for AffinityDescriptor {
    /// Renders the kernel range-list form, e.g. `0-3,8`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cores = self.cores.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = cores.next() {
            let mut end = start;
            while cores.peek() == Some(&end.saturating_add(1)) {
                end = end.saturating_add(1);
                cores.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AffinityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AffinityDescriptor({self})")
    }
}

/// Parse a CPU range list string (e.g., "0-3,5,7-9") into sorted CPU IDs.
pub(crate) fn parse_cpu_range_list(s: &str) -> Result<Vec<usize>, CpuAffinityError> {
    let mut cpus = BTreeSet::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start_str, end_str)) = part.split_once('-') {
            let parse = |value: &str| {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| CpuAffinityError::ParseError(format!("Invalid CPU range: {part}")))
            };
            let (start, end) = (parse(start_str)?, parse(end_str)?);
            if start > end {
                return Err(CpuAffinityError::ParseError(format!(
                    "Reversed CPU range: {part}"
                )));
            }
            if end >= CPU_SETSIZE {
                return Err(CpuAffinityError::InvalidCpu {
                    cpu: end,
                    max: CPU_SETSIZE - 1,
                });
            }
            cpus.extend(start..=end);
        } else {
            let cpu = part
                .parse::<usize>()
                .map_err(|_| CpuAffinityError::ParseError(format!("Invalid CPU ID: {part}")))?;
            cpus.insert(cpu);
        }
    }

    Ok(cpus.into_iter().collect())
}
