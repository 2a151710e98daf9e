//! Rolling change budget
//!
//! Turns the user-facing [`ChangeBudget`] into absolute numbers and computes
//! how many Pods a single reconciliation pass may create or delete.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{parse_percent, ChangeBudget};
use crate::error::{Error, Result};

/// A change budget with percentages resolved against a Pod count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedChangeBudget {
    pub max_surge: u32,
    pub max_unavailable: u32,
}

/// Pod counts observed at the start of a pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PodCounts {
    /// Pods the cluster should end up with
    pub target: u32,
    /// Pods that currently exist
    pub current: u32,
    /// Existing Pods that are ready
    pub ready: u32,
    /// Pods that still need to be created
    pub to_create: u32,
    /// Pods that still need to be deleted
    pub to_delete: u32,
    /// Pods to delete that are not ready, their removal costs no availability
    pub to_delete_unready: u32,
}

impl PodCounts {
    pub fn has_pending_changes(&self) -> bool {
        self.to_create > 0 || self.to_delete > 0
    }
}

/// What a single pass may do
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeAllowance {
    pub creations: u32,
    pub deletions: u32,
}

impl ResolvedChangeBudget {
    /// Resolve `budget` against `starting_pods`, the Pod count when the
    /// update started. Unavailable rounds down and surge rounds up so that
    /// availability wins over speed.
    pub fn resolve(budget: &ChangeBudget, starting_pods: u32) -> Result<Self> {
        Ok(Self {
            max_surge: resolve_value(&budget.max_surge_or_default(), starting_pods, true)
                .map_err(|e| Error::ValidationError(format!("maxSurge: {e}")))?,
            max_unavailable: resolve_value(
                &budget.max_unavailable_or_default(),
                starting_pods,
                false,
            )
            .map_err(|e| Error::ValidationError(format!("maxUnavailable: {e}")))?,
        })
    }

    /// Number of creations and deletions allowed by this budget.
    ///
    /// Fails with [`Error::ChangeBudgetStalled`] when both budgets are zero
    /// and the pending changes cannot make any progress as a result.
    pub fn allowance(&self, counts: PodCounts) -> Result<ChangeAllowance> {
        let max_pods = counts.target.saturating_add(self.max_surge);
        let min_available = counts.target.saturating_sub(self.max_unavailable);

        let unready = counts.to_delete_unready.min(counts.to_delete);
        let ready_deletions = (counts.to_delete - unready)
            .min(counts.ready.saturating_sub(min_available));
        let allowance = ChangeAllowance {
            creations: counts
                .to_create
                .min(max_pods.saturating_sub(counts.current)),
            deletions: unready + ready_deletions,
        };

        if self.is_zero() && counts.has_pending_changes() && allowance == ChangeAllowance::default()
        {
            return Err(Error::ChangeBudgetStalled(format!(
                "maxSurge and maxUnavailable are both 0, {} Pod(s) to create and {} to delete cannot proceed",
                counts.to_create, counts.to_delete
            )));
        }
        Ok(allowance)
    }

    pub fn is_zero(&self) -> bool {
        self.max_surge == 0 && self.max_unavailable == 0
    }
}

fn resolve_value(value: &IntOrString, total: u32, round_up: bool) -> Result<u32, String> {
    match value {
        IntOrString::Int(i) => u32::try_from(*i).map_err(|_| format!("must not be negative, got {i}")),
        IntOrString::String(s) => {
            let percent = parse_percent(s).ok_or_else(|| format!("invalid percentage {s:?}"))?;
            let scaled = u64::from(percent) * u64::from(total);
            let resolved = if round_up {
                scaled.div_ceil(100)
            } else {
                scaled / 100
            };
            Ok(u32::try_from(resolved).unwrap_or(u32::MAX))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(surge: IntOrString, unavailable: IntOrString) -> ChangeBudget {
        ChangeBudget {
            max_surge: Some(surge),
            max_unavailable: Some(unavailable),
        }
    }

    fn pct(s: &str) -> IntOrString {
        IntOrString::String(s.to_string())
    }

    #[test]
    fn test_default_budget() {
        let resolved = ResolvedChangeBudget::resolve(&ChangeBudget::default(), 3).unwrap();
        assert_eq!(resolved.max_surge, 1);
        assert_eq!(resolved.max_unavailable, 0);
    }

    #[test]
    fn test_absent_fields_take_defaults() {
        let partial = ChangeBudget {
            max_surge: None,
            max_unavailable: Some(IntOrString::Int(2)),
        };
        let resolved = ResolvedChangeBudget::resolve(&partial, 5).unwrap();
        assert_eq!(resolved.max_surge, 1);
        assert_eq!(resolved.max_unavailable, 2);
    }

    #[test]
    fn test_percentages_of_ten() {
        let resolved = ResolvedChangeBudget::resolve(&budget(pct("30%"), pct("30%")), 10).unwrap();
        assert_eq!(resolved.max_surge, 3);
        assert_eq!(resolved.max_unavailable, 3);
    }

    #[test]
    fn test_percentage_rounding_is_asymmetric() {
        let resolved = ResolvedChangeBudget::resolve(&budget(pct("25%"), pct("25%")), 10).unwrap();
        assert_eq!(resolved.max_surge, 3);
        assert_eq!(resolved.max_unavailable, 2);

        // 10% of 3 Pods: surge still allows one, unavailable allows none
        let resolved = ResolvedChangeBudget::resolve(&budget(pct("10%"), pct("10%")), 3).unwrap();
        assert_eq!(resolved.max_surge, 1);
        assert_eq!(resolved.max_unavailable, 0);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ResolvedChangeBudget::resolve(&budget(IntOrString::Int(-1), IntOrString::Int(0)), 3)
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(msg) if msg.starts_with("maxSurge")));

        let err = ResolvedChangeBudget::resolve(&budget(IntOrString::Int(1), pct("lots")), 3)
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(msg) if msg.starts_with("maxUnavailable")));
    }

    #[test]
    fn test_allowance_rolling_replacement_with_surge() {
        let resolved = ResolvedChangeBudget::resolve(&ChangeBudget::default(), 3).unwrap();
        let allowance = resolved
            .allowance(PodCounts {
                target: 3,
                current: 3,
                ready: 3,
                to_create: 3,
                to_delete: 3,
                to_delete_unready: 0,
            })
            .unwrap();
        // one extra Pod may be created, nothing may go down
        assert_eq!(
            allowance,
            ChangeAllowance {
                creations: 1,
                deletions: 0
            }
        );

        // once the surge Pod is ready one old Pod may go
        let allowance = resolved
            .allowance(PodCounts {
                target: 3,
                current: 4,
                ready: 4,
                to_create: 2,
                to_delete: 3,
                to_delete_unready: 0,
            })
            .unwrap();
        assert_eq!(
            allowance,
            ChangeAllowance {
                creations: 0,
                deletions: 1
            }
        );
    }

    #[test]
    fn test_allowance_scale_down_uses_ready_pods() {
        let resolved =
            ResolvedChangeBudget::resolve(&budget(IntOrString::Int(0), IntOrString::Int(1)), 5)
                .unwrap();
        let allowance = resolved
            .allowance(PodCounts {
                target: 3,
                current: 5,
                ready: 4,
                to_create: 0,
                to_delete: 2,
                to_delete_unready: 0,
            })
            .unwrap();
        // 4 ready, at least 2 must stay available
        assert_eq!(allowance.deletions, 2);

        let allowance = resolved
            .allowance(PodCounts {
                target: 3,
                current: 5,
                ready: 2,
                to_create: 0,
                to_delete: 2,
                to_delete_unready: 0,
            })
            .unwrap();
        assert_eq!(allowance.deletions, 0);
    }

    #[test]
    fn test_unready_leaving_pods_can_always_go() {
        let resolved = ResolvedChangeBudget::resolve(&ChangeBudget::default(), 3).unwrap();
        let allowance = resolved
            .allowance(PodCounts {
                target: 2,
                current: 3,
                ready: 2,
                to_create: 0,
                to_delete: 1,
                to_delete_unready: 1,
            })
            .unwrap();
        assert_eq!(allowance.deletions, 1);

        // the unready Pod goes, the ready ones are held by maxUnavailable 0
        let allowance = resolved
            .allowance(PodCounts {
                target: 2,
                current: 4,
                ready: 2,
                to_create: 0,
                to_delete: 2,
                to_delete_unready: 1,
            })
            .unwrap();
        assert_eq!(allowance.deletions, 1);
    }

    #[test]
    fn test_zero_budget_removes_unready_pods_without_stalling() {
        let resolved =
            ResolvedChangeBudget::resolve(&budget(IntOrString::Int(0), IntOrString::Int(0)), 3)
                .unwrap();
        let allowance = resolved
            .allowance(PodCounts {
                target: 2,
                current: 3,
                ready: 2,
                to_create: 0,
                to_delete: 1,
                to_delete_unready: 1,
            })
            .unwrap();
        assert_eq!(allowance.deletions, 1);
    }

    #[test]
    fn test_allowance_never_exceeds_pending_changes() {
        let resolved =
            ResolvedChangeBudget::resolve(&budget(IntOrString::Int(10), IntOrString::Int(10)), 3)
                .unwrap();
        let allowance = resolved
            .allowance(PodCounts {
                target: 5,
                current: 3,
                ready: 3,
                to_create: 2,
                to_delete: 0,
                to_delete_unready: 0,
            })
            .unwrap();
        assert_eq!(
            allowance,
            ChangeAllowance {
                creations: 2,
                deletions: 0
            }
        );
    }

    #[test]
    fn test_zero_budget_stalls_rolling_changes() {
        let resolved =
            ResolvedChangeBudget::resolve(&budget(IntOrString::Int(0), IntOrString::Int(0)), 3)
                .unwrap();
        assert!(resolved.is_zero());

        let err = resolved
            .allowance(PodCounts {
                target: 3,
                current: 3,
                ready: 3,
                to_create: 1,
                to_delete: 1,
                to_delete_unready: 0,
            })
            .unwrap_err();
        assert!(matches!(err, Error::ChangeBudgetStalled(_)));
    }

    #[test]
    fn test_zero_budget_without_changes_is_fine() {
        let resolved =
            ResolvedChangeBudget::resolve(&budget(IntOrString::Int(0), IntOrString::Int(0)), 3)
                .unwrap();
        let allowance = resolved
            .allowance(PodCounts {
                target: 3,
                current: 3,
                ready: 3,
                to_create: 0,
                to_delete: 0,
                to_delete_unready: 0,
            })
            .unwrap();
        assert_eq!(allowance, ChangeAllowance::default());
    }

    #[test]
    fn test_zero_budget_still_allows_plain_scale_up() {
        let resolved =
            ResolvedChangeBudget::resolve(&budget(IntOrString::Int(0), IntOrString::Int(0)), 3)
                .unwrap();
        let allowance = resolved
            .allowance(PodCounts {
                target: 5,
                current: 3,
                ready: 3,
                to_create: 2,
                to_delete: 0,
                to_delete_unready: 0,
            })
            .unwrap();
        assert_eq!(allowance.creations, 2);
    }
}
