// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Counter merging. Tools that read several counter-data files for one
//! binary merge counter vectors implicitly as they go; the semantics
//! depend on the counter mode the meta-data file declares.

use anyhow::{bail, ensure, Result};

use crate::format::{CounterGranularity, CounterMode};

#[derive(Debug, Default)]
pub struct Merger {
    mode: CounterMode,
    granularity: CounterGranularity,
    overflow: bool,
}

impl Merger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the counter mode and granularity declared by a meta-data
    /// file. When merging across more than one meta-data file, a
    /// disagreement with an earlier file is a hard error.
    pub fn set_mode_and_granularity(
        &mut self,
        mode: CounterMode,
        granularity: CounterGranularity,
    ) -> Result<()> {
        if self.mode != CounterMode::Invalid {
            if self.mode != mode {
                bail!(
                    "counter mode clash while reading meta-data file, previous file had {}, new file has {mode}",
                    self.mode
                );
            }
            if self.granularity != granularity {
                bail!(
                    "counter granularity clash while reading meta-data file, previous file had {}, new file has {granularity}",
                    self.granularity
                );
            }
        }

        self.mode = mode;
        self.granularity = granularity;
        Ok(())
    }

    pub fn reset_mode_and_granularity(&mut self) {
        self.mode = CounterMode::Invalid;
        self.granularity = CounterGranularity::Invalid;
        self.overflow = false;
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    pub fn granularity(&self) -> CounterGranularity {
        self.granularity
    }

    /// Merge the counter values in `src` into `dst` under the current
    /// mode. Returns whether any addition saturated during this call;
    /// the sticky flag is cleared afterwards.
    pub fn merge_counters(&mut self, dst: &mut [u32], src: &[u32]) -> Result<bool> {
        ensure!(
            dst.len() == src.len(),
            "merging counters: len(dst)={} len(src)={}",
            dst.len(),
            src.len()
        );

        if self.mode == CounterMode::Set {
            for (d, s) in dst.iter_mut().zip(src) {
                if *s != 0 {
                    *d = 1;
                }
            }
        } else {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = self.saturating_add(*d, *s);
            }
        }

        Ok(std::mem::take(&mut self.overflow))
    }

    /// Add with saturation at `u32::MAX`, recording overflow for the
    /// current merge call.
    pub fn saturating_add(&mut self, dst: u32, src: u32) -> u32 {
        let (sum, overflowed) = dst.overflowing_add(src);
        if overflowed {
            self.overflow = true;
            u32::MAX
        } else {
            sum
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::format::{CounterGranularity, CounterMode};

    use super::Merger;

    fn merger(mode: CounterMode) -> Merger {
        let mut m = Merger::new();
        m.set_mode_and_granularity(mode, CounterGranularity::PerBlock)
            .unwrap();
        m
    }

    #[test]
    fn set_mode_is_a_boolean_union() -> Result<()> {
        let mut m = merger(CounterMode::Set);

        let mut dst = vec![0, 3, 0, 7];
        m.merge_counters(&mut dst, &[2, 0, 0, 1])?;
        assert_eq!(dst, vec![1, 3, 0, 7]);

        // Idempotent.
        let snapshot = dst.clone();
        m.merge_counters(&mut dst, &snapshot)?;
        assert_eq!(dst, vec![1, 1, 0, 1]);
        let again = dst.clone();
        m.merge_counters(&mut dst, &again)?;
        assert_eq!(dst, again);

        Ok(())
    }

    #[test]
    fn count_mode_adds() -> Result<()> {
        let mut m = merger(CounterMode::Count);

        let mut dst = vec![2, 0, 1];
        let overflow = m.merge_counters(&mut dst, &[1, 1, 0])?;
        assert_eq!(dst, vec![3, 1, 1]);
        assert!(!overflow);

        // Merging zero is the identity.
        m.merge_counters(&mut dst, &[0, 0, 0])?;
        assert_eq!(dst, vec![3, 1, 1]);

        Ok(())
    }

    #[test]
    fn count_mode_saturates_and_reports_overflow() -> Result<()> {
        let mut m = merger(CounterMode::Count);

        let mut dst = vec![0xFFFF_FFF0u32];
        let overflow = m.merge_counters(&mut dst, &[0x20])?;
        assert_eq!(dst, vec![u32::MAX]);
        assert!(overflow);

        // The flag does not leak into the next call.
        let overflow = m.merge_counters(&mut dst, &[0])?;
        assert_eq!(dst, vec![u32::MAX]);
        assert!(!overflow);

        let overflow = m.merge_counters(&mut dst, &[1])?;
        assert_eq!(dst, vec![u32::MAX]);
        assert!(overflow);

        Ok(())
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mut m = merger(CounterMode::Count);
        let mut dst = vec![1, 2];
        assert!(m.merge_counters(&mut dst, &[1]).is_err());
    }

    #[test]
    fn mode_and_granularity_clashes() -> Result<()> {
        let mut m = Merger::new();
        m.set_mode_and_granularity(CounterMode::Count, CounterGranularity::PerBlock)?;

        // Same values are fine.
        m.set_mode_and_granularity(CounterMode::Count, CounterGranularity::PerBlock)?;

        assert!(m
            .set_mode_and_granularity(CounterMode::Set, CounterGranularity::PerBlock)
            .is_err());
        assert!(m
            .set_mode_and_granularity(CounterMode::Count, CounterGranularity::PerFunc)
            .is_err());

        m.reset_mode_and_granularity();
        m.set_mode_and_granularity(CounterMode::Set, CounterGranularity::PerFunc)?;
        assert_eq!(m.mode(), CounterMode::Set);
        assert_eq!(m.granularity(), CounterGranularity::PerFunc);

        Ok(())
    }
}
