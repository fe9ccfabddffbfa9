//! This module contains the materialisation of guarded outcomes into forked
//! scopes.

use tracing::trace;

use crate::{
    expr::Expr,
    scope::{ExecutionScope, Guarded, SatResult},
};

/// Forks `scope` once per outcome, asserting each outcome's guard in its own
/// clone.
///
/// Outcomes whose guard is unsatisfiable are dropped, so the result contains
/// one scope for every outcome that can actually occur.
pub fn fork<S, T>(scope: &S, outcomes: impl IntoIterator<Item = Guarded<T>>) -> Vec<(S, T)>
where
    S: ExecutionScope + Clone,
{
    outcomes
        .into_iter()
        .filter_map(|Guarded { guard, value }| {
            if guard.is_false() {
                return None;
            }
            let mut branch = scope.clone();
            match branch.assert(&guard) {
                SatResult::Unsat => {
                    trace!(%guard, "Dropped unsatisfiable branch");
                    None
                }
                SatResult::Sat | SatResult::Unknown => Some((branch, value)),
            }
        })
        .collect()
}

/// Forks `scope` on `condition`, returning the scope in which it holds and the
/// scope in which it does not, where those are satisfiable.
pub fn split<S>(scope: &S, condition: &Expr) -> (Option<S>, Option<S>)
where
    S: ExecutionScope + Clone,
{
    let mut branches = fork(
        scope,
        [
            Guarded::new(condition.clone(), true),
            Guarded::new(Expr::not(condition.clone()), false),
        ],
    );
    let on_false = branches
        .iter()
        .position(|(_, holds)| !holds)
        .map(|index| branches.remove(index).0);
    let on_true = branches.pop().map(|(scope, _)| scope);
    (on_true, on_false)
}

#[cfg(test)]
mod test {
    use crate::{
        data::bit_string::BitString,
        expr::{numeric, Expr},
        scope::{
            concolic::ConcolicScope,
            fork::{fork, split},
            ExecutionScope,
            FieldKey,
            Guarded,
        },
    };

    #[test]
    fn drops_branches_that_cannot_occur() {
        let mut scope = ConcolicScope::new();
        let cell = scope.allocate_cell();
        scope.seed_cell(cell, &BitString::from_binary("1010").unwrap(), &[]);
        let length = scope.read_field(cell, &FieldKey::DataLength, numeric::SIZE_SORT);

        let outcomes = vec![
            Guarded::new(Expr::equal(length.clone(), numeric::size(4)), "four"),
            Guarded::new(Expr::equal(length, numeric::size(5)), "five"),
            Guarded::new(Expr::falsity(), "never"),
        ];
        let branches = fork(&scope, outcomes);
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].1, "four");
    }

    #[test]
    fn splits_on_a_condition() {
        let mut scope = ConcolicScope::new();
        let cell = scope.allocate_cell();
        scope.seed_cell(cell, &BitString::from_binary("1").unwrap(), &[]);
        let length = scope.read_field(cell, &FieldKey::DataLength, numeric::SIZE_SORT);

        let (yes, no) = split(&scope, &Expr::ult(length, numeric::size(2)));
        assert!(yes.is_some());
        assert!(no.is_none());
    }
}
