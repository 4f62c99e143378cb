use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Seen on two consecutive cycles and different from the last emitted set.
    Confirmed(BTreeSet<String>),
    /// First sighting, waiting for a repeat.
    Pending,
    /// Same as the last emitted set.
    Unchanged,
    /// Nothing identified this cycle.
    Empty,
    /// No repeat for too many cycles in a row.
    Unstable,
}

/// Two-cycle confirmation over the (order-independent) set of identified cards.
#[derive(Debug, Clone)]
pub struct ConfirmationFilter {
    pending: Option<BTreeSet<String>>,
    last_emitted: Option<BTreeSet<String>>,
    unconfirmed_cycles: u32,
    max_unconfirmed_cycles: u32,
}

impl ConfirmationFilter {
    pub fn new(max_unconfirmed_cycles: u32) -> Self {
        Self {
            pending: None,
            last_emitted: None,
            unconfirmed_cycles: 0,
            max_unconfirmed_cycles: max_unconfirmed_cycles.max(1),
        }
    }

    pub fn observe<I>(&mut self, card_ids: I) -> Confirmation
    where
        I: IntoIterator<Item = String>,
    {
        let observed: BTreeSet<String> = card_ids.into_iter().collect();

        if observed.is_empty() {
            self.pending = None;
            self.unconfirmed_cycles = 0;
            return Confirmation::Empty;
        }

        if self.last_emitted.as_ref() == Some(&observed) {
            self.pending = None;
            self.unconfirmed_cycles = 0;
            return Confirmation::Unchanged;
        }

        if self.pending.as_ref() == Some(&observed) {
            info!("Confirmed card set {:?}", observed);
            self.pending = None;
            self.unconfirmed_cycles = 0;
            self.last_emitted = Some(observed.clone());
            return Confirmation::Confirmed(observed);
        }

        debug!("Pending card set {:?}", observed);
        self.pending = Some(observed);
        self.unconfirmed_cycles += 1;
        if self.unconfirmed_cycles >= self.max_unconfirmed_cycles {
            warn!(
                "No stable card set after {} cycles",
                self.unconfirmed_cycles
            );
            Confirmation::Unstable
        } else {
            Confirmation::Pending
        }
    }

    pub fn unconfirmed_cycles(&self) -> u32 {
        self.unconfirmed_cycles
    }

    pub fn last_emitted(&self) -> Option<&BTreeSet<String>> {
        self.last_emitted.as_ref()
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.last_emitted = None;
        self.unconfirmed_cycles = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_transient_misread_emits_nothing() {
        let mut f = ConfirmationFilter::new(5);
        assert_eq!(f.observe(set(&["A", "B", "C"])), Confirmation::Pending);
        assert_eq!(f.observe(set(&["A", "B", "D"])), Confirmation::Pending);
        assert!(f.last_emitted().is_none());
    }

    #[test]
    fn test_repeat_confirms_once() {
        let mut f = ConfirmationFilter::new(5);
        assert_eq!(f.observe(set(&["A", "B", "C"])), Confirmation::Pending);
        assert!(matches!(
            f.observe(set(&["C", "A", "B"])),
            Confirmation::Confirmed(s) if s.len() == 3
        ));
        assert_eq!(f.observe(set(&["B", "C", "A"])), Confirmation::Unchanged);
    }

    #[test]
    fn test_new_set_after_confirmation() {
        let mut f = ConfirmationFilter::new(5);
        f.observe(set(&["A", "B", "C"]));
        f.observe(set(&["A", "B", "C"]));
        assert_eq!(f.observe(set(&["D", "E", "F"])), Confirmation::Pending);
        assert!(matches!(f.observe(set(&["D", "E", "F"])), Confirmation::Confirmed(_)));
    }

    #[test]
    fn test_empty_clears_pending() {
        let mut f = ConfirmationFilter::new(5);
        f.observe(set(&["A"]));
        assert_eq!(f.observe(Vec::new()), Confirmation::Empty);
        assert_eq!(f.observe(set(&["A"])), Confirmation::Pending);
    }

    #[test]
    fn test_unstable_after_limit() {
        let mut f = ConfirmationFilter::new(3);
        assert_eq!(f.observe(set(&["A"])), Confirmation::Pending);
        assert_eq!(f.observe(set(&["B"])), Confirmation::Pending);
        assert_eq!(f.observe(set(&["C"])), Confirmation::Unstable);
        assert_eq!(f.unconfirmed_cycles(), 3);
        // a repeat still confirms and clears the counter
        assert!(matches!(f.observe(set(&["C"])), Confirmation::Confirmed(_)));
        assert_eq!(f.unconfirmed_cycles(), 0);
    }
}
