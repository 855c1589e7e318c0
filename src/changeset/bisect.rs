// src/changeset/bisect.rs

//! Binary search for the changeset that broke a test
//!
//! The driver owns only the search; materializing a candidate state and
//! running the test command are injected, so the command layer wires them
//! to the rollback engine and a workspace-rooted subprocess.

use tracing::info;

use crate::error::Result;

use super::Changeset;

/// Result of a bisect run
#[derive(Debug, Clone)]
pub struct BisectOutcome {
    /// First changeset at which the test fails
    pub culprit: String,
    /// How many candidate states were materialized
    pub steps: usize,
}

/// Binary-search `candidates` (oldest first, all committed) for the first
/// one where `test` fails.
///
/// `start` is assumed good and `end` (the last candidate) bad, matching
/// `git bisect` semantics. `materialize` brings the workspace to the state
/// of the given changeset; `test` reports whether that state passes.
pub fn bisect(
    candidates: &[Changeset],
    mut materialize: impl FnMut(&Changeset) -> Result<()>,
    mut test: impl FnMut() -> Result<bool>,
) -> Result<Option<BisectOutcome>> {
    if candidates.is_empty() {
        return Ok(None);
    }

    let mut low = 0usize;
    let mut high = candidates.len() - 1;
    let mut steps = 0usize;
    let mut culprit = None;

    while low <= high {
        let mid = low + (high - low) / 2;
        let candidate = &candidates[mid];
        info!(
            "bisect: testing changeset {} ({} of {} candidates)",
            candidate.id,
            mid + 1,
            candidates.len()
        );

        materialize(candidate)?;
        steps += 1;

        if test()? {
            // Still good here; culprit is later
            low = mid + 1;
        } else {
            culprit = Some(candidate.id.clone());
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }

    Ok(culprit.map(|culprit| BisectOutcome { culprit, steps }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangesetStatus;
    use chrono::Utc;

    fn changesets(n: usize) -> Vec<Changeset> {
        (0..n)
            .map(|i| Changeset {
                id: format!("cs{i}"),
                timestamp: Utc::now(),
                author: "t".to_string(),
                description: format!("change {i}"),
                status: ChangesetStatus::Committed,
                repos: Vec::new(),
                metadata: Default::default(),
            })
            .collect()
    }

    #[test]
    fn test_finds_single_culprit() {
        let candidates = changesets(8);
        // Changesets 0..=4 pass, 5..=7 fail: culprit is cs5
        let materialized = std::cell::RefCell::new(None);
        let outcome = bisect(
            &candidates,
            |c| {
                *materialized.borrow_mut() = Some(c.id.clone());
                Ok(())
            },
            || {
                let id: usize = materialized.borrow().as_ref().unwrap()[2..].parse().unwrap();
                Ok(id < 5)
            },
        )
        .unwrap()
        .unwrap();

        assert_eq!(outcome.culprit, "cs5");
        // Binary search over 8 candidates stays logarithmic
        assert!(outcome.steps <= 4, "took {} steps", outcome.steps);
    }

    #[test]
    fn test_first_candidate_is_culprit() {
        let candidates = changesets(4);
        let mut current = None;
        let outcome = bisect(
            &candidates,
            |c| {
                current = Some(c.id.clone());
                Ok(())
            },
            || Ok(false),
        )
        .unwrap()
        .unwrap();
        assert_eq!(outcome.culprit, "cs0");
    }

    #[test]
    fn test_all_pass_yields_none() {
        let candidates = changesets(4);
        let outcome = bisect(&candidates, |_| Ok(()), || Ok(true)).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn test_empty_candidates() {
        let outcome = bisect(&[], |_| Ok(()), || Ok(true)).unwrap();
        assert!(outcome.is_none());
    }
}
