use crate::node::finger_entry::FingerEntry;
use crate::utils::crypto;
use crate::utils::types::{Address, HashPos};

/// Per-node routing table of size M (§3, §4.1). Slot `i` tracks the address
/// responsible for id `(self.id + 2^i) mod N`.
#[derive(Debug, Clone)]
pub struct FingerTable {
    pub fingers: Vec<FingerEntry>,
    /// Round-robin cursor advanced by `fix_fingers` (§4.1 step 3).
    next_to_fix: usize,
}

impl FingerTable {
    pub fn new(own_id: &HashPos, size: usize) -> Self {
        let fingers = (0..size)
            .map(|i| FingerEntry::new(crypto::add_pow2(own_id, i as u32)))
            .collect();
        FingerTable {
            fingers,
            next_to_fix: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.fingers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingers.is_empty()
    }

    /// Sets every finger to `address`, used when starting a brand-new
    /// single-node ring (teacher's `set_all_fingers`, §4.1 join trivial case).
    pub fn set_all(&mut self, address: &Address) {
        for finger in &mut self.fingers {
            finger.address = Some(address.clone());
        }
    }

    /// Advances the round-robin cursor and returns the index to refresh next,
    /// along with the lookup position that index is responsible for.
    pub fn advance(&mut self) -> (usize, HashPos) {
        let index = self.next_to_fix;
        self.next_to_fix = (self.next_to_fix + 1) % self.fingers.len().max(1);
        (index, self.fingers[index].start)
    }

    pub fn set(&mut self, index: usize, address: Address) {
        self.fingers[index].address = Some(address);
    }

    /// Scans the table in reverse looking for the finger closest to `x` on
    /// the arc `(self_id, x)`, skipping unset and unreachable entries
    /// (§4.1 `closest_preceding_node`). `is_reachable` is injected so the
    /// predicate stays synchronous and testable without a network.
    pub fn closest_preceding<'a>(
        &'a self,
        self_id: &HashPos,
        x: &HashPos,
        mut is_reachable: impl FnMut(&Address) -> bool,
    ) -> Option<&'a Address> {
        for finger in self.fingers.iter().rev() {
            if let Some(address) = &finger.address {
                let fid = address.id();
                if crypto::in_arc(&fid, self_id, x) && is_reachable(address) {
                    return Some(address);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_from(n: u8) -> HashPos {
        let mut p = [0u8; 20];
        p[19] = n;
        p
    }

    fn addr(host: &str) -> Address {
        Address::new("chord.dht", host, 9000)
    }

    #[test]
    fn new_table_has_no_addresses_until_touched() {
        let table = FingerTable::new(&id_from(1), 8);
        assert!(table.fingers.iter().all(|f| f.address.is_none()));
    }

    #[test]
    fn advance_cycles_round_robin() {
        let mut table = FingerTable::new(&id_from(1), 3);
        let first = table.advance().0;
        let second = table.advance().0;
        let third = table.advance().0;
        let fourth = table.advance().0;
        assert_eq!([first, second, third, fourth], [0, 1, 2, 0]);
    }

    #[test]
    fn set_all_fills_every_slot() {
        let mut table = FingerTable::new(&id_from(1), 4);
        table.set_all(&addr("10.0.0.1"));
        assert!(table.fingers.iter().all(|f| f.address.is_some()));
    }

    #[test]
    fn closest_preceding_skips_unreachable_and_unset() {
        let mut table = FingerTable::new(&id_from(10), 4);
        table.set(0, addr("a"));
        table.set(2, addr("b"));
        // force deterministic positions for the test by overwriting starts
        table.fingers[0].start = id_from(50);
        table.fingers[2].start = id_from(90);

        let found = table.closest_preceding(&id_from(10), &id_from(100), |a| a.host != "a");
        assert_eq!(found.map(|a| a.host.as_str()), Some("b"));
    }
}
