//! Attribute-table objects.
//!
//! Generated code holds raw addresses of attribute slots (location handles),
//! so entries must never move once created. Tables are append-only vectors
//! of boxed entries; the heap keeps every object alive for the lifetime of
//! the JIT that owns it.

use crate::Value;

/// Attribute key: the address of an interned name. Interned strings are
/// deduplicated, so pointer identity is name identity.
type AttrKey = u64;

#[derive(Debug)]
struct Entry {
    key: AttrKey,
    value: Value,
}

/// One object: a small append-only attribute table.
#[derive(Debug, Default)]
pub struct Object {
    entries: Vec<Box<Entry>>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the slot for `key`, creating the slot on first access.
    /// The address stays valid for the lifetime of the heap.
    pub fn attr_ptr(&mut self, key: AttrKey) -> *mut Value {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            return &mut entry.value;
        }
        self.entries.push(Box::new(Entry {
            key,
            value: Value::from_i32(0),
        }));
        &mut self.entries.last_mut().expect("just pushed").value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owns every object a JIT instance ever allocates.
#[derive(Debug, Default)]
pub struct ObjectHeap {
    objects: Vec<Box<Object>>,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh object and return its stable address.
    pub fn alloc(&mut self) -> *mut Object {
        self.objects.push(Box::new(Object::new()));
        &mut **self.objects.last_mut().expect("just pushed")
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_slot_is_stable() {
        let mut obj = Object::new();
        let first = obj.attr_ptr(0x1000);
        // Force reallocation of the entry vector.
        for key in 0..64 {
            obj.attr_ptr(0x2000 + key);
        }
        let again = obj.attr_ptr(0x1000);
        assert_eq!(first, again);
        assert_eq!(obj.len(), 65);
    }

    #[test]
    fn test_attr_read_write() {
        let mut obj = Object::new();
        let slot = obj.attr_ptr(0x1000);
        unsafe {
            assert_eq!(*slot, Value::from_i32(0));
            *slot = Value::from_i32(42);
        }
        let again = obj.attr_ptr(0x1000);
        assert_eq!(unsafe { *again }, Value::from_i32(42));
    }

    #[test]
    fn test_heap_objects_are_stable() {
        let mut heap = ObjectHeap::new();
        let first = heap.alloc();
        for _ in 0..32 {
            heap.alloc();
        }
        unsafe {
            let slot = (*first).attr_ptr(0x1);
            *slot = Value::from_i32(9);
            assert_eq!(*(*first).attr_ptr(0x1), Value::from_i32(9));
        }
        assert_eq!(heap.len(), 33);
    }
}
