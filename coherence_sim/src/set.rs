use crate::line::CoherenceLine;

/// lines sharing one cache index. lookups and victim selection are linear in the associativity.
#[derive(Debug, Clone)]
pub struct CoherenceSet {
    lines: Vec<CoherenceLine>,
    associativity: usize,
}

impl CoherenceSet {
    pub fn new(associativity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(associativity),
            associativity,
        }
    }
    pub fn has_line(&self, tag: u64) -> bool {
        self.lines.iter().any(|l| l.tag() == tag)
    }
    pub fn find(&self, tag: u64) -> Option<&CoherenceLine> {
        self.lines.iter().find(|l| l.tag() == tag)
    }
    pub fn find_mut(&mut self, tag: u64) -> Option<&mut CoherenceLine> {
        self.lines.iter_mut().find(|l| l.tag() == tag)
    }
    /// callers must check [`Self::has_line`] first.
    pub fn get_line(&self, tag: u64) -> &CoherenceLine {
        self.find(tag)
            .unwrap_or_else(|| panic!("line with tag {tag:#x} is not resident"))
    }
    /// callers must check [`Self::has_line`] first.
    pub fn get_line_mut(&mut self, tag: u64) -> &mut CoherenceLine {
        self.find_mut(tag)
            .unwrap_or_else(|| panic!("line with tag {tag:#x} is not resident"))
    }
    pub fn is_full(&self) -> bool {
        self.lines.len() == self.associativity
    }
    pub fn len(&self) -> usize {
        self.lines.len()
    }
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
    /// callers must evict first when the set is full.
    pub fn add_line(&mut self, line: CoherenceLine) {
        assert!(
            !self.is_full(),
            "set is full ({} ways); evict before adding tag {:#x}",
            self.associativity,
            line.tag()
        );
        assert!(
            !self.has_line(line.tag()),
            "tag {:#x} is already resident",
            line.tag()
        );
        self.lines.push(line);
    }
    /// removes the line used longest ago. ties go to the lowest tag.
    pub fn evict_lru_line(&mut self) -> Option<CoherenceLine> {
        let victim = self
            .lines
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| (l.last_used, l.tag()))
            .map(|(i, _)| i)?;
        Some(self.lines.swap_remove(victim))
    }
    pub fn lines(&self) -> impl Iterator<Item = &CoherenceLine> {
        self.lines.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::LineState::*;

    fn set_with(lines: &[(u64, u64)]) -> CoherenceSet {
        let mut s = CoherenceSet::new(lines.len());
        for &(tag, used) in lines {
            s.add_line(CoherenceLine::new(tag, Shared, used));
        }
        s
    }

    #[test]
    fn test_membership() {
        let mut s = CoherenceSet::new(2);
        assert!(s.is_empty());
        s.add_line(CoherenceLine::new(7, Modified, 3));
        assert!(s.has_line(7));
        assert!(!s.has_line(8));
        assert!(!s.is_full());
        assert_eq!(s.get_line(7).state, Modified);
        s.add_line(CoherenceLine::new(8, Shared, 4));
        assert!(s.is_full());
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_invalid_line_stays_resident() {
        let mut s = CoherenceSet::new(1);
        s.add_line(CoherenceLine::new(1, Shared, 0));
        s.get_line_mut(1).state = Invalid;
        assert!(s.has_line(1));
        assert!(s.is_full());
    }

    #[test]
    fn test_evict_lru() {
        let mut s = set_with(&[(10, 5), (11, 2), (12, 9), (13, 4)]);
        assert_eq!(s.evict_lru_line().unwrap().tag(), 11);
        assert_eq!(s.evict_lru_line().unwrap().tag(), 13);
        assert_eq!(s.evict_lru_line().unwrap().tag(), 10);
        assert_eq!(s.evict_lru_line().unwrap().tag(), 12);
        assert!(s.evict_lru_line().is_none());
    }

    #[test]
    fn test_evict_minimum_over_many_orders() {
        // victim is always the minimum `last_used` whatever the insertion order
        let uses = [17u64, 3, 42, 8, 23, 5, 31, 11];
        for rot in 0..uses.len() {
            let mut lines: Vec<(u64, u64)> = uses
                .iter()
                .enumerate()
                .map(|(i, &u)| (i as u64 + 100, u))
                .collect();
            lines.rotate_left(rot);
            let mut s = set_with(&lines);
            let min = lines.iter().min_by_key(|(_, u)| *u).unwrap().0;
            assert_eq!(s.evict_lru_line().unwrap().tag(), min);
            assert!(!s.has_line(min));
        }
    }

    #[test]
    fn test_evict_tie_breaks_on_lowest_tag() {
        let mut s = set_with(&[(30, 1), (20, 1), (40, 1)]);
        assert_eq!(s.evict_lru_line().unwrap().tag(), 20);
        assert_eq!(s.evict_lru_line().unwrap().tag(), 30);
    }

    #[test]
    #[should_panic(expected = "not resident")]
    fn test_get_absent_line() {
        let s = CoherenceSet::new(2);
        s.get_line(3);
    }

    #[test]
    #[should_panic(expected = "set is full")]
    fn test_add_to_full_set() {
        let mut s = set_with(&[(1, 0)]);
        s.add_line(CoherenceLine::new(2, Shared, 0));
    }
}
