use crate::dedup::IgnoreSet;

/// Whether a classified finding gets reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Report,
    /// Already reported or ignored; the iteration continues silently.
    Suppress,
}

/// What happens once a finding has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Terminate,
}

/// Decides how long fuzzing goes on after findings.
///
/// A budget of 1 stops at the first finding and never looks at the ignore set.
/// A larger budget keeps going until that many distinct tokens are in the set.
#[derive(Debug)]
pub struct KeepGoing {
    budget: u64,
    ignored: IgnoreSet,
}

impl KeepGoing {
    pub fn new(budget: u64, ignored: IgnoreSet) -> Self {
        Self {
            budget: budget.max(1),
            ignored,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    fn consults_ignore_set(&self) -> bool {
        self.budget > 1
    }

    pub fn admit(&mut self, token: u64) -> Admission {
        if self.consults_ignore_set() && !self.ignored.insert(token) {
            Admission::Suppress
        } else {
            Admission::Report
        }
    }

    pub fn after_report(&self) -> Decision {
        if self.budget == 1 || self.ignored.len() as u64 >= self.budget {
            Decision::Terminate
        } else {
            Decision::Continue
        }
    }

    /// Tokens in the ignore set, including preloaded ones.
    pub fn distinct_findings(&self) -> usize {
        self.ignored.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_of_one_always_reports_and_terminates() {
        let mut keep_going = KeepGoing::new(1, IgnoreSet::with_tokens([42]));
        assert_eq!(keep_going.admit(42), Admission::Report, "ignore set is not consulted");
        assert_eq!(keep_going.after_report(), Decision::Terminate);
        assert_eq!(keep_going.distinct_findings(), 1, "nothing was inserted");
    }

    #[test]
    fn larger_budget_suppresses_repeats() {
        let mut keep_going = KeepGoing::new(3, IgnoreSet::new());
        assert_eq!(keep_going.admit(1), Admission::Report);
        assert_eq!(keep_going.after_report(), Decision::Continue);
        assert_eq!(keep_going.admit(1), Admission::Suppress);
        assert_eq!(keep_going.admit(2), Admission::Report);
        assert_eq!(keep_going.after_report(), Decision::Continue);
        assert_eq!(keep_going.admit(3), Admission::Report);
        assert_eq!(keep_going.after_report(), Decision::Terminate);
    }

    #[test]
    fn preloaded_tokens_count_towards_budget() {
        let mut keep_going = KeepGoing::new(2, IgnoreSet::with_tokens([9]));
        assert_eq!(keep_going.admit(9), Admission::Suppress);
        assert_eq!(keep_going.admit(10), Admission::Report);
        assert_eq!(keep_going.after_report(), Decision::Terminate);
    }

    #[test]
    fn zero_budget_behaves_like_one() {
        let keep_going = KeepGoing::new(0, IgnoreSet::new());
        assert_eq!(keep_going.budget(), 1);
    }
}
