//! Explicit status state machines.
//!
//! Every persisted status field is an enum with a transition table. Writers go
//! through [`StatusMachine::transition`] so an illegal move (for example a view
//! going `completed -> generating`) is rejected instead of silently stored.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Shared behaviour of status enums with a transition table.
pub trait StatusMachine: Copy + Eq + fmt::Display + Sized {
    /// Entity name used in error messages.
    const ENTITY: &'static str;

    /// Whether `self -> next` is an allowed move (self-loops are handled by `transition`).
    fn can_transition_to(self, next: Self) -> bool;

    fn is_terminal(self) -> bool;

    /// Validate a move. Re-writing the current status is a no-op and always allowed.
    fn transition(self, next: Self) -> DomainResult<Self> {
        if self == next || self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::illegal_transition(Self::ENTITY, self, next))
        }
    }
}

macro_rules! impl_status_strings {
    ($t:ty, $entity:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(DomainError::validation(format!(
                        "unknown {} status: {other}",
                        $entity
                    ))),
                }
            }
        }
    };
}

/// Status of a project's enrichment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl_status_strings!(RunStatus, "run", {
    Idle => "idle",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

impl StatusMachine for RunStatus {
    const ENTITY: &'static str = "run";

    fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::*;
        match (self, next) {
            // Every run starts by resetting the state, including a stale
            // `running` left behind by a process that died mid-run.
            (_, Running) => true,
            (Running, Completed | Failed) => true,
            _ => false,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Enrichment status of a single item, derived from its persisted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Neither a result nor an error is recorded.
    Pending,
    Enriched,
    Failed,
}

impl_status_strings!(ItemStatus, "item", {
    Pending => "pending",
    Enriched => "enriched",
    Failed => "failed",
});

impl StatusMachine for ItemStatus {
    const ENTITY: &'static str = "item";

    fn can_transition_to(self, next: Self) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Enriched) | (Pending, Failed) | (Failed, Pending)
        )
    }

    fn is_terminal(self) -> bool {
        !matches!(self, ItemStatus::Pending)
    }
}

/// Status of a single generation stage (sales text) or a single view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

impl_status_strings!(StageStatus, "stage", {
    Pending => "pending",
    Generating => "generating",
    Completed => "completed",
    Failed => "failed",
});

impl StatusMachine for StageStatus {
    const ENTITY: &'static str = "stage";

    fn can_transition_to(self, next: Self) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Generating) | (Pending, Failed) | (Generating, Completed) | (Generating, Failed)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

/// Aggregate status of a design's image stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
    Partial,
}

impl_status_strings!(ImageStatus, "image", {
    Pending => "pending",
    Generating => "generating",
    Completed => "completed",
    Failed => "failed",
    Partial => "partial",
});

impl StatusMachine for ImageStatus {
    const ENTITY: &'static str = "image";

    fn can_transition_to(self, next: Self) -> bool {
        use ImageStatus::*;
        matches!(
            (self, next),
            (Pending, Generating)
                | (Pending, Failed)
                | (Generating, Completed)
                | (Generating, Failed)
                | (Generating, Partial)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            ImageStatus::Completed | ImageStatus::Failed | ImageStatus::Partial
        )
    }
}

impl ImageStatus {
    /// Aggregate the per-view statuses.
    ///
    /// `completed` iff all completed, `failed` iff all failed, `partial` once any
    /// view is terminal, otherwise `generating` if any view is in flight.
    pub fn from_views(views: &[StageStatus]) -> Self {
        if views.is_empty() {
            return ImageStatus::Pending;
        }
        if views.iter().all(|s| *s == StageStatus::Completed) {
            return ImageStatus::Completed;
        }
        if views.iter().all(|s| *s == StageStatus::Failed) {
            return ImageStatus::Failed;
        }
        if views.iter().any(|s| s.is_terminal()) {
            return ImageStatus::Partial;
        }
        if views.iter().any(|s| *s == StageStatus::Generating) {
            return ImageStatus::Generating;
        }
        ImageStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageStatus::*;

    #[test]
    fn image_status_mixed_views_is_partial() {
        assert_eq!(
            ImageStatus::from_views(&[Completed, Failed, Pending]),
            ImageStatus::Partial
        );
    }

    #[test]
    fn image_status_all_completed_or_failed() {
        assert_eq!(
            ImageStatus::from_views(&[Completed, Completed, Completed]),
            ImageStatus::Completed
        );
        assert_eq!(
            ImageStatus::from_views(&[Failed, Failed, Failed]),
            ImageStatus::Failed
        );
    }

    #[test]
    fn image_status_before_any_terminal_view() {
        assert_eq!(
            ImageStatus::from_views(&[Pending, Pending, Pending]),
            ImageStatus::Pending
        );
        assert_eq!(
            ImageStatus::from_views(&[Generating, Pending, Pending]),
            ImageStatus::Generating
        );
    }

    #[test]
    fn stage_cannot_regress() {
        let err = Completed.transition(Generating).unwrap_err();
        assert_eq!(
            err,
            DomainError::illegal_transition("stage", "completed", "generating")
        );
        assert!(Failed.transition(Completed).is_err());
        assert_eq!(Generating.transition(Generating), Ok(Generating));
    }

    #[test]
    fn run_always_restartable() {
        for from in [
            RunStatus::Idle,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(from.transition(RunStatus::Running), Ok(RunStatus::Running));
        }
        assert!(RunStatus::Idle.transition(RunStatus::Completed).is_err());
        assert!(RunStatus::Completed.transition(RunStatus::Failed).is_err());
    }

    #[test]
    fn item_error_must_be_cleared_before_enrichment() {
        assert!(ItemStatus::Failed.transition(ItemStatus::Enriched).is_err());
        assert_eq!(
            ItemStatus::Failed.transition(ItemStatus::Pending),
            Ok(ItemStatus::Pending)
        );
        assert!(ItemStatus::Enriched.transition(ItemStatus::Pending).is_err());
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in ["pending", "generating", "completed", "failed", "partial"] {
            assert_eq!(s.parse::<ImageStatus>().unwrap().as_str(), s);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn stage() -> impl Strategy<Value = StageStatus> {
            prop_oneof![
                Just(Pending),
                Just(Generating),
                Just(Completed),
                Just(Failed)
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: the aggregate depends only on the multiset of view statuses.
            #[test]
            fn image_status_is_order_independent(a in stage(), b in stage(), c in stage()) {
                let base = ImageStatus::from_views(&[a, b, c]);
                prop_assert_eq!(base, ImageStatus::from_views(&[c, a, b]));
                prop_assert_eq!(base, ImageStatus::from_views(&[b, c, a]));
            }

            /// Property: once every view is terminal the aggregate is terminal too.
            #[test]
            fn terminal_views_give_terminal_aggregate(a in stage(), b in stage(), c in stage()) {
                let aggregate = ImageStatus::from_views(&[a, b, c]);
                if [a, b, c].iter().all(|s| s.is_terminal()) {
                    prop_assert!(aggregate.is_terminal());
                }
                if aggregate == ImageStatus::Completed {
                    prop_assert!([a, b, c].iter().all(|s| *s == Completed));
                }
            }

            /// Property: a terminal stage accepts no move except rewriting itself.
            #[test]
            fn terminal_stages_are_final(from in stage(), to in stage()) {
                if from.is_terminal() && from != to {
                    prop_assert!(from.transition(to).is_err());
                }
            }
        }
    }
}
