pub mod tier;

use crate::data::{Key, Value};
use crate::error::Result;

/// Operations supported by Random Indexes
pub trait RandomOps<V>
where
    V: Value,
{
    /// Fetch value by key
    fn get(&self, key: Key) -> Option<V>;
    /// Blind insert
    fn put(&mut self, key: Key, value: V) -> Result<()>;
    /// Read-Modify-Write operation
    fn rmw<F: Sized>(&mut self, key: Key, f: F) -> bool
    where
        F: FnMut(&mut V);
}
