use core::hint;
use core::ptr::{self, NonNull};
use core::slice;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use crate::error::{Result, TierTableError};
use crate::hint::{likely, unlikely};
use crate::index::tier::header;
use crate::index::tier::{calc_hash, overflow_hash};

pub(crate) const KEY_BYTES: usize = 8;

/// Largest chain offset a header can carry before saturating.
const MAX_SPILL_OFFSET: u8 = 62;

/// Slots visited by the backward fallback scan when spilling.
const BACKWARD_SCAN_SLOTS: u16 = 254;

/// Whether memory allocation errors should return an error or abort.
#[derive(Copy, Clone)]
enum Fallibility {
    Fallible,
    Infallible,
}

impl Fallibility {
    /// Error to return on capacity overflow.
    #[inline]
    fn capacity_overflow(self) -> TierTableError {
        match self {
            Fallibility::Fallible => TierTableError::CapacityOverflow,
            Fallibility::Infallible => panic!("tier table capacity overflow"),
        }
    }

    /// Error to return on allocation error.
    #[inline]
    fn alloc_err(self, layout: Layout) -> TierTableError {
        match self {
            Fallibility::Fallible => TierTableError::AllocError(layout.size()),
            Fallibility::Infallible => handle_alloc_error(layout),
        }
    }
}

/// Returns the primary-tier size exponent for the requested capacity.
///
/// The exponent is clamped to at least 3 (8 slots, the smallest geometry
/// whose overflow tier still has a slot) and refused above 61, past which
/// the hash shift would eat into the mixed bits.
#[inline]
fn capacity_to_log2(min_capacity: usize) -> Option<u32> {
    let log2 = min_capacity.checked_next_power_of_two()?.trailing_zeros();
    let log2 = u32::max(log2, 3);
    if log2 > 61 {
        None
    } else {
        Some(log2)
    }
}

/// Returns a Layout describing the single allocation backing both tiers,
/// and the byte offset at which the overflow tier starts.
///
/// The primary region carries one padding slot on each side so that `h ± 1`
/// probing never needs a bounds check. Overflow slots drop the header byte.
///
/// Returns `None` if an overflow occurs.
#[inline]
fn calculate_layout(t1_slots: usize, stride: usize) -> Option<(Layout, usize)> {
    let t2_offset = t1_slots.checked_add(2)?.checked_mul(stride)?;
    let t2_bytes = (t1_slots >> 3).checked_mul(stride - 1)?;
    let len = t2_offset.checked_add(t2_bytes)?;
    Layout::from_size_align(len, 1).ok().map(|l| (l, t2_offset))
}

/// A view over one primary-tier slot: header byte, key bytes, value bytes.
#[derive(Clone, Copy)]
struct Slot {
    ptr: *mut u8,
}

impl Slot {
    #[inline]
    unsafe fn header(self) -> u8 {
        *self.ptr
    }
    #[inline]
    unsafe fn set_header(self, byte: u8) {
        *self.ptr = byte;
    }
    #[inline]
    unsafe fn key(self) -> u64 {
        ptr::read_unaligned(self.ptr.add(1) as *const u64)
    }
    #[inline]
    unsafe fn set_key(self, key: u64) {
        ptr::write_unaligned(self.ptr.add(1) as *mut u64, key);
    }
    #[inline]
    unsafe fn value_ptr(self) -> *mut u8 {
        self.ptr.add(1 + KEY_BYTES)
    }
    /// Key and value bytes together, the unit copied on a spill.
    #[inline]
    unsafe fn record_ptr(self) -> *mut u8 {
        self.ptr.add(1)
    }
}

/// A view over one overflow-tier slot: key bytes, value bytes, no header.
#[derive(Clone, Copy)]
struct OverflowSlot {
    ptr: *mut u8,
}

impl OverflowSlot {
    #[inline]
    unsafe fn key(self) -> u64 {
        ptr::read_unaligned(self.ptr as *const u64)
    }
    #[inline]
    unsafe fn value_ptr(self) -> *mut u8 {
        self.ptr.add(KEY_BYTES)
    }
    #[inline]
    unsafe fn record_ptr(self) -> *mut u8 {
        self.ptr
    }
}

/// The two-tier table over raw value bytes.
///
/// Keys hash to a primary slot and live within one slot of it; the header
/// tag says which neighbour. Entries squeezed out of a full neighbourhood
/// spill into the overflow tier, reachable through the offset field the
/// displaced headers carry.
pub struct RawTable {
    // Start of the backing allocation; the first stride is the left padding
    // slot.
    buf: NonNull<u8>,
    // Primary slot 0.
    t1: NonNull<u8>,
    // Overflow tier start.
    t2: NonNull<u8>,
    layout: Layout,
    // 64 - log2(primary slots); the mix keeps only the top bits.
    hash_shift: u8,
    // Header byte + key bytes + value bytes.
    stride: usize,
    value_bytes: usize,
    // Spills allowed before the overflow tier counts as loaded.
    spill_budget: u64,
    // One-based overflow slot holding key 0, or 0 while no zero key is
    // spilled. Overflow slots are recognised as empty by a zero key, so a
    // genuine zero key needs out-of-band tracking.
    zero_key_slot: usize,
    // Number of entries, only really used by len()
    items: usize,
}

impl RawTable {
    /// Allocates a table with at least `min_capacity` primary slots, each
    /// holding `value_bytes` bytes of value payload.
    ///
    /// Aborts the process if the allocator refuses the backing buffer.
    pub fn with_capacity(min_capacity: usize, value_bytes: usize) -> Self {
        Self::fallible_with_capacity(min_capacity, value_bytes, Fallibility::Infallible)
            .unwrap_or_else(|_| unsafe { hint::unreachable_unchecked() })
    }

    /// Fallible version of [`RawTable::with_capacity`].
    pub fn try_with_capacity(min_capacity: usize, value_bytes: usize) -> Result<Self> {
        Self::fallible_with_capacity(min_capacity, value_bytes, Fallibility::Fallible)
    }

    fn fallible_with_capacity(
        min_capacity: usize,
        value_bytes: usize,
        fallibility: Fallibility,
    ) -> Result<Self> {
        let log2 = match capacity_to_log2(min_capacity) {
            Some(log2) => log2,
            None => return Err(fallibility.capacity_overflow()),
        };
        let t1_slots = 1usize << log2;
        let stride = match value_bytes.checked_add(1 + KEY_BYTES) {
            Some(stride) => stride,
            None => return Err(fallibility.capacity_overflow()),
        };
        let (layout, t2_offset) = match calculate_layout(t1_slots, stride) {
            Some(parts) => parts,
            None => return Err(fallibility.capacity_overflow()),
        };
        // Zeroed memory is the empty state for both tiers.
        let buf = match NonNull::new(unsafe { alloc_zeroed(layout) }) {
            Some(buf) => buf,
            None => return Err(fallibility.alloc_err(layout)),
        };
        let t2_slots = (t1_slots >> 3) as u64;

        Ok(Self {
            buf,
            t1: unsafe { NonNull::new_unchecked(buf.as_ptr().add(stride)) },
            t2: unsafe { NonNull::new_unchecked(buf.as_ptr().add(t2_offset)) },
            layout,
            hash_shift: (64 - log2) as u8,
            stride,
            value_bytes,
            spill_budget: ((t2_slots * 6) >> 3) + 1,
            zero_key_slot: 0,
            items: 0,
        })
    }

    /// Returns the primary slot a key hashes to.
    #[inline]
    pub fn home_index(&self, key: u64) -> usize {
        calc_hash(key, self.hash_shift) as usize
    }

    /// Returns the number of primary slots, padding excluded.
    #[inline]
    pub fn t1_slots(&self) -> usize {
        1 << (64 - self.hash_shift)
    }

    /// Returns the number of overflow slots.
    #[inline]
    pub fn t2_slots(&self) -> usize {
        self.t1_slots() >> 3
    }

    /// Returns the value payload width in bytes.
    #[inline]
    pub fn value_bytes(&self) -> usize {
        self.value_bytes
    }

    /// Returns the number of entries in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.items
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Returns the remaining spill countdown.
    #[inline]
    pub fn spill_budget(&self) -> u64 {
        self.spill_budget
    }

    /// Returns whether the overflow tier has absorbed its budgeted share of
    /// spills (≈0.75 of its slots). Callers may want to rebuild into a
    /// larger table once this turns true.
    #[inline]
    pub fn above_spill_threshold(&self) -> bool {
        self.spill_budget == 0
    }

    #[inline]
    unsafe fn slot(&self, index: isize) -> Slot {
        debug_assert!(index >= -1 && index <= self.t1_slots() as isize);
        Slot {
            ptr: self.t1.as_ptr().offset(index * self.stride as isize),
        }
    }

    #[inline]
    unsafe fn overflow_slot(&self, index: usize) -> OverflowSlot {
        debug_assert!(index < self.t2_slots());
        OverflowSlot {
            ptr: self.t2.as_ptr().add(index * (self.stride - 1)),
        }
    }

    #[inline]
    unsafe fn write_value(&self, dst: *mut u8, value: &[u8]) {
        ptr::copy_nonoverlapping(value.as_ptr(), dst, self.value_bytes);
    }

    unsafe fn claim(&mut self, slot: Slot, tag: u8, key: u64, value: &[u8]) {
        slot.set_header(tag);
        slot.set_key(key);
        self.write_value(slot.value_ptr(), value);
        self.items += 1;
    }

    /// Writes the new entry into its home slot after a push made room,
    /// carrying over the strongest chain offset seen while probing.
    unsafe fn claim_home(&mut self, home: usize, key: u64, value: &[u8], chain: u8) {
        let slot = self.slot(home as isize);
        slot.set_header(chain | header::TAG_AT_HOME);
        slot.set_key(key);
        self.write_value(slot.value_ptr(), value);
        self.items += 1;
    }

    /// Searches for a key, returning its value bytes.
    ///
    /// The borrow ends at the next insert: a push may slide primary-tier
    /// entries under previously returned references.
    #[inline]
    pub fn find(&self, key: u64) -> Option<&[u8]> {
        unsafe {
            self.locate(key)
                .map(|value| slice::from_raw_parts(value, self.value_bytes))
        }
    }

    /// Searches for a key, returning its value bytes mutably.
    #[inline]
    pub fn find_mut(&mut self, key: u64) -> Option<&mut [u8]> {
        let value_bytes = self.value_bytes;
        unsafe {
            self.locate(key)
                .map(|value| slice::from_raw_parts_mut(value, value_bytes))
        }
    }

    /// Probe phases: home, right neighbour, left neighbour, overflow tier.
    ///
    /// An empty slot anywhere in the trio proves absence, because slots are
    /// never vacated. The chain offset is accumulated as the max over every
    /// displaced header probed, so a neighbour without a chain of its own
    /// cannot mask one recorded next to it.
    unsafe fn locate(&self, key: u64) -> Option<*mut u8> {
        let home = self.home_index(key);
        let mut chain = 0u8;

        let home_slot = self.slot(home as isize);
        let home_header = home_slot.header();
        let home_tag = header::tag(home_header);
        if home_tag == header::TAG_EMPTY {
            return None;
        }
        if home_tag == header::TAG_AT_HOME {
            if likely(home_slot.key() == key) {
                return Some(home_slot.value_ptr());
            }
            chain = header::spill_bits(home_header);
        }
        if home_tag != header::TAG_LEFT_OF_HOME {
            // The home is not reserved for the right neighbour's hash, so
            // the occupant may have been pushed one slot right.
            let right = self.slot(home as isize + 1);
            let byte = right.header();
            match header::tag(byte) {
                header::TAG_RIGHT_OF_HOME => {
                    if right.key() == key {
                        return Some(right.value_ptr());
                    }
                    chain = u8::max(chain, header::spill_bits(byte));
                }
                header::TAG_EMPTY => return None,
                _ => {}
            }
        }
        let left = self.slot(home as isize - 1);
        let byte = left.header();
        match header::tag(byte) {
            header::TAG_LEFT_OF_HOME => {
                if left.key() == key {
                    return Some(left.value_ptr());
                }
                chain = u8::max(chain, header::spill_bits(byte));
            }
            header::TAG_EMPTY => return None,
            _ => {}
        }
        if chain == 0 {
            return None;
        }
        self.locate_overflow(key, home, header::spill_field(chain))
    }

    /// Reverse linear probe of the overflow tier.
    ///
    /// Starts `spill - 1` slots past the reshuffled hash and walks back to
    /// it; a saturated field keeps walking past the start, since the chain
    /// may have fallen back to slots below it.
    unsafe fn locate_overflow(&self, key: u64, home: usize, spill: u8) -> Option<*mut u8> {
        if unlikely(key == 0) {
            if self.zero_key_slot != 0 {
                return Some(self.overflow_slot(self.zero_key_slot - 1).value_ptr());
            }
            return None;
        }
        let mask = self.t2_slots() - 1;
        let mut offset = u32::from(spill) - 1;
        // Remembers whether the probe began at the saturation marker.
        let mut reach = offset;
        let mut index = (overflow_hash(home as u64) as usize + offset as usize) & mask;
        loop {
            let slot = self.overflow_slot(index);
            if slot.key() == key {
                return Some(slot.value_ptr());
            }
            if offset == 0 {
                if reach != u32::from(MAX_SPILL_OFFSET) {
                    return None;
                }
                offset = 255;
                reach = 0;
            }
            offset -= 1;
            index = if index == 0 { mask } else { index - 1 };
        }
    }

    /// Inserts or overwrites an entry.
    ///
    /// `value` must be exactly as wide as the table was created for.
    /// Fails with [`TierTableError::OverflowFull`] when making room would
    /// require a spill and the overflow tier has no slot in probe reach; the
    /// table is left unchanged in that case.
    pub fn insert(&mut self, key: u64, value: &[u8]) -> Result<()> {
        assert_eq!(
            value.len(),
            self.value_bytes,
            "value width differs from the table's configured width"
        );
        let home = self.home_index(key);
        let mut chain = 0u8;
        unsafe {
            let home_slot = self.slot(home as isize);
            let home_header = home_slot.header();
            let home_tag = header::tag(home_header);
            match home_tag {
                header::TAG_EMPTY => {
                    self.claim(home_slot, header::TAG_AT_HOME, key, value);
                    return Ok(());
                }
                header::TAG_AT_HOME => {
                    if likely(home_slot.key() == key) {
                        self.write_value(home_slot.value_ptr(), value);
                        return Ok(());
                    }
                    chain = header::spill_bits(home_header);
                }
                _ => {}
            }
            if home_tag != header::TAG_LEFT_OF_HOME {
                let right = self.slot(home as isize + 1);
                let byte = right.header();
                match header::tag(byte) {
                    header::TAG_EMPTY => {
                        self.claim(right, header::TAG_RIGHT_OF_HOME, key, value);
                        return Ok(());
                    }
                    header::TAG_RIGHT_OF_HOME => {
                        if right.key() == key {
                            self.write_value(right.value_ptr(), value);
                            return Ok(());
                        }
                        chain = u8::max(chain, header::spill_bits(byte));
                    }
                    _ => {}
                }
            }
            let left = self.slot(home as isize - 1);
            let byte = left.header();
            match header::tag(byte) {
                header::TAG_EMPTY => {
                    self.claim(left, header::TAG_LEFT_OF_HOME, key, value);
                    return Ok(());
                }
                header::TAG_LEFT_OF_HOME => {
                    if left.key() == key {
                        self.write_value(left.value_ptr(), value);
                        return Ok(());
                    }
                    chain = u8::max(chain, header::spill_bits(byte));
                }
                _ => {}
            }
            // A displaced neighbour may already have spilled this key.
            if unlikely(chain != 0) {
                if let Some(value_ptr) = self.locate_overflow(key, home, header::spill_field(chain))
                {
                    self.write_value(value_ptr, value);
                    return Ok(());
                }
            }
            self.insert_by_push(key, value, home, home_tag, chain)
        }
    }

    /// All three neighbourhood slots are taken; make room by pushing.
    unsafe fn insert_by_push(
        &mut self,
        key: u64,
        value: &[u8],
        home: usize,
        home_tag: u8,
        chain: u8,
    ) -> Result<()> {
        let push_right = match home_tag {
            // The left neighbour already holds a displaced entry.
            header::TAG_LEFT_OF_HOME => true,
            header::TAG_AT_HOME => {
                // Prefer the side with more local slack.
                if (home & 1) == 1 {
                    self.slot(home as isize - 2).header() != 0
                } else {
                    self.slot(home as isize + 2).header() == 0
                }
            }
            _ => false,
        };
        if push_right {
            self.push_right(key, value, home, chain)
        } else {
            self.push_left(key, value, home, chain)
        }
    }

    /// Walks right from the home, advancing each occupant's tag by one, and
    /// terminates at an empty slot or by spilling an entry that is already a
    /// full slot right of its home. The header written next to the spilled
    /// slot rides the bulk shift into the freed position, so the chain
    /// offset stays recoverable from the trio.
    unsafe fn push_right(&mut self, key: u64, value: &[u8], home: usize, chain: u8) -> Result<()> {
        let mut scan = home as isize;
        let mut prev1 = 0u8;
        let mut prev2 = 0u8;
        loop {
            let slot = self.slot(scan);
            let byte = slot.header();
            match header::tag(byte) {
                header::TAG_RIGHT_OF_HOME => {
                    let offset = match self.spill_to_overflow(slot, (scan - 1) as u64) {
                        Some(offset) => offset,
                        None => {
                            self.unwind_right(home as isize, scan);
                            return Err(TierTableError::OverflowFull);
                        }
                    };
                    let merged =
                        u8::max(header::compose(offset + 1, header::TAG_RIGHT_OF_HOME), byte);
                    self.slot(scan - 1).set_header(merged);
                    if header::tag(prev2) == header::TAG_LEFT_OF_HOME {
                        self.slot(scan - 2).set_header(merged - 1);
                    }
                    self.shift_right(home as isize, scan);
                    self.claim_home(home, key, value, chain);
                    return Ok(());
                }
                header::TAG_EMPTY => {
                    self.shift_right(home as isize, scan);
                    self.claim_home(home, key, value, chain);
                    return Ok(());
                }
                _ => {
                    slot.set_header(byte + 1);
                    prev2 = prev1;
                    prev1 = byte;
                    scan += 1;
                }
            }
        }
    }

    /// Mirror image of [`RawTable::push_right`].
    unsafe fn push_left(&mut self, key: u64, value: &[u8], home: usize, chain: u8) -> Result<()> {
        let mut scan = home as isize;
        let mut prev1 = 0u8;
        let mut prev2 = 0u8;
        loop {
            let slot = self.slot(scan);
            let byte = slot.header();
            match header::tag(byte) {
                header::TAG_LEFT_OF_HOME => {
                    let offset = match self.spill_to_overflow(slot, (scan + 1) as u64) {
                        Some(offset) => offset,
                        None => {
                            self.unwind_left(scan, home as isize);
                            return Err(TierTableError::OverflowFull);
                        }
                    };
                    let merged =
                        u8::max(header::compose(offset + 1, header::TAG_LEFT_OF_HOME), byte);
                    self.slot(scan + 1).set_header(merged);
                    if header::tag(prev2) == header::TAG_RIGHT_OF_HOME {
                        self.slot(scan + 2).set_header(merged + 1);
                    }
                    self.shift_left(scan, home as isize);
                    self.claim_home(home, key, value, chain);
                    return Ok(());
                }
                header::TAG_EMPTY => {
                    self.shift_left(scan, home as isize);
                    self.claim_home(home, key, value, chain);
                    return Ok(());
                }
                _ => {
                    slot.set_header(byte - 1);
                    prev2 = prev1;
                    prev1 = byte;
                    scan -= 1;
                }
            }
        }
    }

    /// Slides slots `[from, to)` one slot right; `to` is overwritten.
    #[inline]
    unsafe fn shift_right(&mut self, from: isize, to: isize) {
        let src = self.slot(from).ptr;
        ptr::copy(src, src.add(self.stride), (to - from) as usize * self.stride);
    }

    /// Slides slots `(to, from]` one slot left; `to` is overwritten.
    #[inline]
    unsafe fn shift_left(&mut self, to: isize, from: isize) {
        let dst = self.slot(to).ptr;
        ptr::copy(dst.add(self.stride), dst, (from - to) as usize * self.stride);
    }

    /// Undoes the tag increments of a right push whose spill failed.
    unsafe fn unwind_right(&mut self, home: isize, scan: isize) {
        let mut index = home;
        while index < scan {
            let slot = self.slot(index);
            slot.set_header(slot.header() - 1);
            index += 1;
        }
    }

    /// Undoes the tag decrements of a left push whose spill failed.
    unsafe fn unwind_left(&mut self, scan: isize, home: isize) {
        let mut index = home;
        while index > scan {
            let slot = self.slot(index);
            slot.set_header(slot.header() + 1);
            index -= 1;
        }
    }

    /// Moves a primary-tier record into the overflow tier.
    ///
    /// Probes forward from the reshuffled hash for up to 63 slots and
    /// returns the winning offset; once the forward window is exhausted it
    /// falls back to a backward walk and reports the saturated offset, so
    /// lookups know to extend their scan. `None` means the tier is out of
    /// reachable slots and the record was not moved.
    unsafe fn spill_to_overflow(&mut self, source: Slot, home: u64) -> Option<u8> {
        let key = source.key();
        let mask = self.t2_slots() - 1;
        let start = (overflow_hash(home) as usize) & mask;
        // Counted down even when the probe fails; rebuilds are the caller's
        // call, via above_spill_threshold().
        self.spill_budget = self.spill_budget.saturating_sub(1);
        // A stored zero key must not read as an empty slot.
        let zero_guard = if self.zero_key_slot != 0 && key != 0 {
            self.zero_key_slot - 1
        } else {
            usize::MAX
        };

        let mut index = start;
        for offset in 0..=MAX_SPILL_OFFSET {
            let slot = self.overflow_slot(index);
            if slot.key() == 0 && index != zero_guard {
                ptr::copy_nonoverlapping(source.record_ptr(), slot.record_ptr(), self.stride - 1);
                if key == 0 {
                    self.zero_key_slot = index + 1;
                }
                return Some(offset);
            }
            index = if index == mask { 0 } else { index + 1 };
        }

        // Forward window exhausted; walk backwards from the probe start
        // (rare case).
        let mut index = start;
        for _ in 0..BACKWARD_SCAN_SLOTS {
            index = if index == 0 { mask } else { index - 1 };
            let slot = self.overflow_slot(index);
            if slot.key() == 0 && index != zero_guard {
                ptr::copy_nonoverlapping(source.record_ptr(), slot.record_ptr(), self.stride - 1);
                if key == 0 {
                    self.zero_key_slot = index + 1;
                }
                return Some(MAX_SPILL_OFFSET);
            }
        }
        None
    }
}

unsafe impl Send for RawTable {}
unsafe impl Sync for RawTable {}

impl Drop for RawTable {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            dealloc(self.buf.as_ptr(), self.layout);
        }
    }
}
