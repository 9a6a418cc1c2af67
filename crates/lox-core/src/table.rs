//! Open-addressed hash table keyed by interned strings.
//!
//! Used for globals, instance fields, class method tables, and — with
//! `V = Rc<LoxStr>` — the string pool itself. Capacity is always a power
//! of two; the load factor is capped at 0.75; probing is linear with mask
//! `capacity - 1`. Deleted entries are tombstoned so later probes keep
//! finding keys that were inserted after them.

use std::rc::Rc;

use crate::value::LoxStr;

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD: f64 = 0.75;

enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(Rc<LoxStr>, V),
}

pub struct Table<V> {
    slots: Vec<Slot<V>>,
    // Number of occupied + tombstoned slots; drives the growth threshold
    // the same way clox's `count` does.
    count: usize,
}

impl<V: Clone> Table<V> {
    pub fn new() -> Self {
        Table {
            slots: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(..)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Linear probe starting at `hash & (capacity - 1)`, returning the
    /// index of the matching key, the first tombstone seen (for reuse on
    /// insert), or the first empty slot (for a fresh probe chain).
    fn find_slot(&self, key: &LoxStr) -> usize {
        let mask = self.capacity() - 1;
        let mut index = (key.hash as usize) & mask;
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return first_tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) => {
                    if k.hash == key.hash && k.chars == key.chars {
                        return index;
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut grown: Vec<Slot<V>> = (0..new_capacity).map(|_| Slot::Empty).collect();
        let mask = new_capacity - 1;
        for slot in self.slots.drain(..) {
            if let Slot::Occupied(key, value) = slot {
                let mut index = (key.hash as usize) & mask;
                while matches!(grown[index], Slot::Occupied(..)) {
                    index = (index + 1) & mask;
                }
                grown[index] = Slot::Occupied(key, value);
            }
        }
        self.slots = grown;
        // Tombstones are dropped on rehash, so count becomes exactly the
        // number of live entries.
        self.count = self.slots.iter().filter(|s| matches!(s, Slot::Occupied(..))).count();
    }

    fn ensure_capacity(&mut self) {
        if self.slots.is_empty() {
            self.grow(INITIAL_CAPACITY);
            return;
        }
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            self.grow(self.capacity() * 2);
        }
    }

    /// Inserts `key -> value`, returning `true` if `key` was not already
    /// present (clox's `tableSet` return value).
    pub fn insert(&mut self, key: Rc<LoxStr>, value: V) -> bool {
        self.ensure_capacity();
        let index = self.find_slot(&key);
        let is_new = !matches!(self.slots[index], Slot::Occupied(..));
        let was_tombstone = matches!(self.slots[index], Slot::Tombstone);
        if is_new && !was_tombstone {
            self.count += 1;
        }
        self.slots[index] = Slot::Occupied(key, value);
        is_new
    }

    pub fn get(&self, key: &LoxStr) -> Option<&V> {
        if self.slots.is_empty() {
            return None;
        }
        match &self.slots[self.find_slot(key)] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    /// Removes `key`, tombstoning its slot so later probe chains through
    /// it stay intact. Returns whether the key had been present.
    pub fn delete(&mut self, key: &LoxStr) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let index = self.find_slot(key);
        if matches!(self.slots[index], Slot::Occupied(..)) {
            self.slots[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    /// Copies every entry of `other` into `self`, overwriting collisions.
    /// Used by `INHERIT` to seed a subclass's method table from its
    /// superclass.
    pub fn add_all_from(&mut self, other: &Table<V>) {
        for slot in &other.slots {
            if let Slot::Occupied(key, value) = slot {
                self.insert(key.clone(), value.clone());
            }
        }
    }

    /// Probe for an already-interned string with the given characters and
    /// hash, without needing to construct a key first. Only meaningful
    /// when called on the string pool's table.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<LoxStr>> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.capacity() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(key, _) => {
                    if key.hash == hash && key.chars.as_str() == chars {
                        return Some(key.clone());
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }
}

impl<V: Clone> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Rc<LoxStr> {
        Rc::new(LoxStr::new(s.to_string(), crate::strings::fnv1a(s.as_bytes())))
    }

    #[test]
    fn insert_reports_new_vs_overwrite() {
        let mut t: Table<i32> = Table::new();
        assert!(t.insert(key("a"), 1));
        assert!(!t.insert(key("a"), 2));
        assert_eq!(*t.get(&key("a")).unwrap(), 2);
    }

    #[test]
    fn delete_then_reinsert_reuses_tombstone() {
        let mut t: Table<i32> = Table::new();
        t.insert(key("a"), 1);
        t.insert(key("b"), 2);
        assert!(t.delete(&key("a")));
        assert!(t.get(&key("a")).is_none());
        // b must still be reachable even though its probe chain may run
        // through a's now-tombstoned slot.
        assert_eq!(*t.get(&key("b")).unwrap(), 2);
        assert!(t.insert(key("a"), 3));
        assert_eq!(*t.get(&key("a")).unwrap(), 3);
    }

    #[test]
    fn grows_past_load_factor() {
        let mut t: Table<i32> = Table::new();
        for i in 0..100 {
            t.insert(key(&format!("k{i}")), i);
        }
        for i in 0..100 {
            assert_eq!(*t.get(&key(&format!("k{i}"))).unwrap(), i);
        }
    }
}
