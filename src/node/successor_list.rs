use crate::utils::types::Address;

/// The R-long replica of nearest ring neighbors used for fault tolerance
/// (§3, §4.1 `successor list`, §4.2 replication). Index 0 is always the
/// direct successor; index `i` is the `(i+1)`-th nearest neighbor.
#[derive(Debug, Clone)]
pub struct SuccessorList {
    entries: Vec<Address>,
    capacity: usize,
}

impl SuccessorList {
    pub fn new(capacity: usize) -> Self {
        SuccessorList {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Builds a list of length one holding only `self_address`, the state of
    /// a brand-new single-node ring (§4.1 join trivial case).
    pub fn singleton(self_address: Address, capacity: usize) -> Self {
        SuccessorList {
            entries: vec![self_address],
            capacity,
        }
    }

    pub fn direct_successor(&self) -> Option<&Address> {
        self.entries.first()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the whole list, e.g. after `stabilize` learns a fresher
    /// successor and fetches its successor list (§4.1 step 2).
    pub fn replace(&mut self, mut entries: Vec<Address>) {
        entries.truncate(self.capacity);
        self.entries = entries;
    }

    /// Drops the dead direct successor and shifts the remaining entries left,
    /// the failover path used when the direct successor stops responding
    /// (§4.1 "successor unreachable" edge case). Returns the new direct
    /// successor, if any remain.
    pub fn shift_left(&mut self) -> Option<&Address> {
        if !self.entries.is_empty() {
            self.entries.remove(0);
        }
        self.entries.first()
    }

    /// Prepends `address` as the new direct successor, pushing the rest down
    /// one slot and truncating anything that falls off the end (§4.1
    /// `notify`: a new predecessor's list is seeded from ours once adopted).
    pub fn prepend(&mut self, address: Address) {
        self.entries.insert(0, address);
        self.entries.truncate(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str) -> Address {
        Address::new("chord.dht", host, 9000)
    }

    #[test]
    fn shift_left_drops_dead_head() {
        let mut list = SuccessorList::new(3);
        list.replace(vec![addr("a"), addr("b"), addr("c")]);
        let next = list.shift_left().cloned();
        assert_eq!(next, Some(addr("b")));
        assert_eq!(list.as_slice(), &[addr("b"), addr("c")]);
    }

    #[test]
    fn shift_left_on_empty_list_is_a_no_op() {
        let mut list = SuccessorList::new(3);
        assert!(list.shift_left().is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn prepend_truncates_to_capacity() {
        let mut list = SuccessorList::new(2);
        list.replace(vec![addr("b")]);
        list.prepend(addr("a"));
        assert_eq!(list.as_slice(), &[addr("a"), addr("b")]);
        list.prepend(addr("z"));
        assert_eq!(list.as_slice(), &[addr("z"), addr("a")]);
    }

    #[test]
    fn replace_truncates_oversized_input() {
        let mut list = SuccessorList::new(2);
        list.replace(vec![addr("a"), addr("b"), addr("c")]);
        assert_eq!(list.len(), 2);
    }
}
