//! Hash-indexed store for per-frame decoding tokens.
//!
//! A chained hash table keyed by small integers (graph state ids) whose
//! entries live in a slot arena with an index free list, so the per-frame
//! insert/clear cycle of the decoder allocates nothing on the hot path after
//! warm-up. Clearing hands every live entry to the caller and resets only the
//! buckets touched since the previous clear, making it proportional to the
//! active set rather than the table capacity.
//!
//! The decoder keeps one of these for the current frame: by the time the next
//! frame's entries go in, the previous generation has been drained.

use crate::types::StateId;

const NIL: u32 = u32::MAX;

struct Slot<T> {
    key: StateId,
    val: Option<T>,
    /// Next slot in the same bucket chain, or next free slot when on the
    /// free list.
    next: u32,
}

/// Hash table with generation clear and slot recycling.
pub struct HashList<T> {
    buckets: Vec<u32>,
    /// Bucket indices occupied since the last clear.
    touched: Vec<u32>,
    slots: Vec<Slot<T>>,
    free_head: u32,
    len: usize,
}

impl<T> HashList<T> {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            touched: Vec::new(),
            slots: Vec::new(),
            free_head: NIL,
            len: 0,
        }
    }

    /// Number of hash buckets.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live entries in the current generation.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Configure the bucket count. Only legal while the table is empty; the
    /// bucket vector never shrinks.
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(self.is_empty(), "set_size on a non-empty HashList");
        if size > self.buckets.len() {
            self.buckets.resize(size, NIL);
        }
    }

    fn bucket_of(&self, key: StateId) -> usize {
        debug_assert!(!self.buckets.is_empty(), "set_size was never called");
        key as usize % self.buckets.len()
    }

    fn alloc(&mut self, key: StateId, val: T) -> u32 {
        if self.free_head != NIL {
            let idx = self.free_head;
            let slot = &mut self.slots[idx as usize];
            self.free_head = slot.next;
            slot.key = key;
            slot.val = Some(val);
            slot.next = NIL;
            idx
        } else {
            self.slots.push(Slot {
                key,
                val: Some(val),
                next: NIL,
            });
            (self.slots.len() - 1) as u32
        }
    }

    /// Find the first entry inserted under `key` in the current generation.
    pub fn find(&self, key: StateId) -> Option<&T> {
        let mut cur = self.buckets[self.bucket_of(key)];
        while cur != NIL {
            let slot = &self.slots[cur as usize];
            if slot.key == key {
                return slot.val.as_ref();
            }
            cur = slot.next;
        }
        None
    }

    /// Mutable variant of [`find`](Self::find), used for token
    /// recombination.
    pub fn find_mut(&mut self, key: StateId) -> Option<&mut T> {
        let bucket = self.bucket_of(key);
        let mut cur = self.buckets[bucket];
        while cur != NIL {
            let slot_key = self.slots[cur as usize].key;
            if slot_key == key {
                return self.slots[cur as usize].val.as_mut();
            }
            cur = self.slots[cur as usize].next;
        }
        None
    }

    /// Insert a new key. The caller asserts the key is not already present
    /// (checked in debug builds).
    pub fn insert(&mut self, key: StateId, val: T) {
        debug_assert!(self.find(key).is_none(), "insert of an existing key");
        let bucket = self.bucket_of(key);
        let idx = self.alloc(key, val);
        let head = self.buckets[bucket];
        if head == NIL {
            self.touched.push(bucket as u32);
        }
        self.slots[idx as usize].next = head;
        self.buckets[bucket] = idx;
        self.len += 1;
    }

    /// Insert an additional entry for a key that is already present. Entries
    /// sharing a key stay contiguous in their chain and
    /// [`find`](Self::find) keeps returning the first one inserted.
    pub fn insert_more(&mut self, key: StateId, val: T) {
        let bucket = self.bucket_of(key);
        // locate the first slot with this key
        let mut cur = self.buckets[bucket];
        while cur != NIL && self.slots[cur as usize].key != key {
            cur = self.slots[cur as usize].next;
        }
        debug_assert!(cur != NIL, "insert_more without an existing entry");
        let idx = self.alloc(key, val);
        let after = self.slots[cur as usize].next;
        self.slots[idx as usize].next = after;
        self.slots[cur as usize].next = idx;
        self.len += 1;
    }

    /// Drain every live entry into `out` (appending) and reset the table.
    /// Runs in time proportional to the touched buckets plus the entry
    /// count; slot storage is recycled, not freed.
    pub fn clear_into(&mut self, out: &mut Vec<(StateId, T)>) {
        for bucket in self.touched.drain(..) {
            let mut cur = self.buckets[bucket as usize];
            while cur != NIL {
                let slot = &mut self.slots[cur as usize];
                let next = slot.next;
                let val = slot.val.take().expect("live slot holds a value");
                out.push((slot.key, val));
                slot.next = self.free_head;
                self.free_head = cur;
                cur = next;
            }
            self.buckets[bucket as usize] = NIL;
        }
        self.len = 0;
    }

    /// Iterate over the live entries of the current generation, in no
    /// particular order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            touched_pos: 0,
            cur: NIL,
        }
    }
}

impl<T> Default for HashList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a HashList<T>,
    touched_pos: usize,
    cur: u32,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (StateId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cur == NIL {
            if self.touched_pos >= self.list.touched.len() {
                return None;
            }
            let bucket = self.list.touched[self.touched_pos] as usize;
            self.touched_pos += 1;
            self.cur = self.list.buckets[bucket];
        }
        let slot = &self.list.slots[self.cur as usize];
        self.cur = slot.next;
        Some((slot.key, slot.val.as_ref().expect("live slot holds a value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_find() {
        let mut list: HashList<i32> = HashList::new();
        list.set_size(8);
        list.insert(3, 30);
        list.insert(11, 110); // collides with 3 in 8 buckets
        list.insert(5, 50);

        assert_eq!(list.len(), 3);
        assert_eq!(list.find(3), Some(&30));
        assert_eq!(list.find(11), Some(&110));
        assert_eq!(list.find(5), Some(&50));
        assert_eq!(list.find(4), None);
    }

    #[test]
    fn find_mut_replaces_value() {
        let mut list: HashList<i32> = HashList::new();
        list.set_size(4);
        list.insert(2, 1);
        *list.find_mut(2).expect("present") = 9;
        assert_eq!(list.find(2), Some(&9));
    }

    #[test]
    fn clear_drains_and_recycles_slots() {
        let mut list: HashList<i32> = HashList::new();
        list.set_size(16);
        for k in 0..10 {
            list.insert(k, k as i32 * 10);
        }
        let slots_before = list.slots.len();

        let mut drained = Vec::new();
        list.clear_into(&mut drained);
        assert_eq!(drained.len(), 10);
        assert!(list.is_empty());
        assert_eq!(list.find(3), None);

        // next generation reuses the same arena
        for k in 20..30 {
            list.insert(k, k as i32);
        }
        assert_eq!(list.slots.len(), slots_before);
        assert_eq!(list.find(25), Some(&25));
    }

    #[test]
    fn insert_more_keeps_first_insertion_for_find() {
        let mut list: HashList<i32> = HashList::new();
        list.set_size(4);
        list.insert(7, 1);
        list.insert_more(7, 2);
        list.insert_more(7, 3);
        assert_eq!(list.find(7), Some(&1));
        assert_eq!(list.len(), 3);

        // entries with the same key are contiguous in iteration order
        let keys: Vec<StateId> = list.iter().map(|(k, _)| k).collect();
        let first = keys.iter().position(|&k| k == 7).expect("present");
        let last = keys.iter().rposition(|&k| k == 7).expect("present");
        assert_eq!(last - first, 2);
    }

    #[test]
    fn iter_visits_every_entry_once() {
        let mut list: HashList<u32> = HashList::new();
        list.set_size(8);
        for k in 0..20 {
            list.insert(k, k);
        }
        let mut seen: Vec<u32> = list.iter().map(|(_, &v)| v).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn set_size_grows_only() {
        let mut list: HashList<i32> = HashList::new();
        list.set_size(32);
        list.set_size(8);
        assert_eq!(list.size(), 32);
    }

    #[test]
    #[should_panic]
    fn set_size_panics_when_occupied() {
        let mut list: HashList<i32> = HashList::new();
        list.set_size(4);
        list.insert(1, 1);
        list.set_size(8);
    }
}
