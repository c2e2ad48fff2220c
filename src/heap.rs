//! Slotted object heap.
//!
//! Slot ids partition into three ranges: a borrow range (1–127) used as a
//! downward-growing stack of short-lived references, a special range
//! (128–131) holding the four pre-initialized constants, and an allocated
//! range (≥132) of ordinary heap objects.

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::Value;
use rustc_hash::FxHashMap;

/// First id in the allocated range.
pub const FIRST_ALLOCATED_ID: u32 = 132;
/// First id in the special range.
const SPECIAL_UNDEFINED: u32 = 128;
const SPECIAL_NULL: u32 = 129;
const SPECIAL_TRUE: u32 = 130;
const SPECIAL_FALSE: u32 = 131;
/// Initial (empty) borrow-stack pointer. Valid borrow slots occupy
/// `2..=127`; the pointer reaching `1` means the stack is full.
const BORROW_PTR_EMPTY: u32 = 128;
const BORROW_PTR_FLOOR: u32 = 1;

/// A saved borrow-stack pointer, delimiting the entries a
/// [`ObjectHeap::pop_borrow_frame`] call will clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowFrame(u32);

/// A pre-announced run of ids that return-value references land in, in
/// order, via [`ObjectHeap::fill_next_reserved`].
#[derive(Debug, Clone, Copy)]
struct ReservationScope {
    start: u32,
    count: u32,
    next_index: u32,
}

/// The slot map shared by both peers. `insert` never reuses a freed id
/// within the lifetime of the heap: freed ids only return to circulation
/// conceptually, they are never handed back out, because the two peers'
/// agreement on the water-mark is what keeps speculative batch allocation
/// sound.
#[derive(Debug)]
pub struct ObjectHeap {
    allocated: FxHashMap<u32, Value>,
    free_list: Vec<u32>,
    water_mark: u32,
    borrow_slots: FxHashMap<u32, Value>,
    borrow_ptr: u32,
    reservations: Vec<ReservationScope>,
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHeap {
    /// Create a heap with the four special slots pre-initialized and the
    /// water-mark at [`FIRST_ALLOCATED_ID`].
    pub fn new() -> Self {
        Self {
            allocated: FxHashMap::default(),
            free_list: Vec::new(),
            water_mark: FIRST_ALLOCATED_ID,
            borrow_slots: FxHashMap::default(),
            borrow_ptr: BORROW_PTR_EMPTY,
            reservations: Vec::new(),
        }
    }

    /// Assign the current water-mark as this value's id, advance the
    /// water-mark, and store the value. Freed ids are never reused.
    pub fn insert(&mut self, v: Value) -> u32 {
        let id = self.water_mark;
        self.water_mark += 1;
        self.allocated.insert(id, v);
        id
    }

    /// Fetch the value at `id`, across special, borrow, and allocated
    /// ranges alike.
    pub fn get(&self, id: u32) -> RuntimeResult<Value> {
        match id {
            SPECIAL_UNDEFINED => Ok(Value::Undefined),
            SPECIAL_NULL => Ok(Value::Null),
            SPECIAL_TRUE => Ok(Value::Bool(true)),
            SPECIAL_FALSE => Ok(Value::Bool(false)),
            id if id < SPECIAL_UNDEFINED => self
                .borrow_slots
                .get(&id)
                .cloned()
                .ok_or_else(|| RuntimeError::ProtocolViolation(format!("no borrowed ref at {id}"))),
            id => self
                .allocated
                .get(&id)
                .cloned()
                .ok_or_else(|| RuntimeError::ProtocolViolation(format!("no heap object at {id}"))),
        }
    }

    /// Free `id`. A no-op for any id below [`FIRST_ALLOCATED_ID`] (special
    /// and borrow-range ids are never freed through this path); otherwise
    /// clears the slot and pushes `id` onto the free list.
    pub fn remove(&mut self, id: u32) {
        if id < FIRST_ALLOCATED_ID {
            return;
        }
        if self.allocated.remove(&id).is_some() {
            self.free_list.push(id);
        }
    }

    /// True iff `id` is within the allocated range and not on the free list.
    pub fn has(&self, id: u32) -> bool {
        id >= FIRST_ALLOCATED_ID && self.allocated.contains_key(&id)
    }

    /// Number of live allocated objects (water-mark minus frees minus the
    /// size of the allocated range's starting offset).
    pub fn live_count(&self) -> u32 {
        self.water_mark - self.free_list.len() as u32 - FIRST_ALLOCATED_ID
    }

    /// Current allocated-range water-mark (the next fresh id `insert` would
    /// hand out, absent any active reservation scope).
    pub fn water_mark(&self) -> u32 {
        self.water_mark
    }

    /// Push `v` onto the borrow stack and return its new (decremented)
    /// pointer. Fails once the pointer would reach the floor.
    pub fn add_borrowed_ref(&mut self, v: Value) -> RuntimeResult<u32> {
        if self.borrow_ptr <= BORROW_PTR_FLOOR + 1 {
            return Err(RuntimeError::BorrowStackOverflow);
        }
        self.borrow_ptr -= 1;
        self.borrow_slots.insert(self.borrow_ptr, v);
        Ok(self.borrow_ptr)
    }

    /// Save the current borrow-stack pointer as a new frame.
    pub fn push_borrow_frame(&mut self) -> BorrowFrame {
        BorrowFrame(self.borrow_ptr)
    }

    /// Restore the borrow-stack pointer to `frame`, clearing every slot
    /// allocated since the frame was pushed.
    pub fn pop_borrow_frame(&mut self, frame: BorrowFrame) {
        for id in self.borrow_ptr..frame.0 {
            self.borrow_slots.remove(&id);
        }
        self.borrow_ptr = frame.0;
    }

    /// Advance the water-mark by `count` and record a new reservation
    /// scope covering the resulting block of ids.
    pub fn push_reservation_scope(&mut self, count: u32) {
        let start = self.water_mark;
        self.water_mark += count;
        self.reservations.push(ReservationScope {
            start,
            count,
            next_index: 0,
        });
    }

    /// Drop the innermost reservation scope.
    pub fn pop_reservation_scope(&mut self) {
        self.reservations.pop();
    }

    /// Store `v` at the next placeholder id in the innermost reservation
    /// scope, in order.
    pub fn fill_next_reserved(&mut self, v: Value) -> RuntimeResult<u32> {
        let scope = self
            .reservations
            .last_mut()
            .ok_or(RuntimeError::ReservationScopeExhausted)?;
        if scope.next_index >= scope.count {
            return Err(RuntimeError::ReservationScopeExhausted);
        }
        let id = scope.start + scope.next_index;
        scope.next_index += 1;
        self.allocated.insert(id, v);
        Ok(id)
    }

    /// Whether a reservation scope is currently active (used by the
    /// dispatch loop to decide between `fill_next_reserved` and a plain
    /// `insert`).
    pub fn has_active_reservation(&self) -> bool {
        !self.reservations.is_empty()
    }
}
