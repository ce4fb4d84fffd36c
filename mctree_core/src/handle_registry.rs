use crate::{errors::ErrorCode, McTree};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Handle ID type - safer than raw pointers
pub type HandleId = u64;

/// Global registry of trees owned by C callers.  The mutex is what
/// serializes every call on a tree.
struct HandleRegistry {
    handles: Mutex<HashMap<HandleId, Box<McTree>>>,
    next_id: AtomicU64,
}

impl HandleRegistry {
    fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1), // Start from 1, reserve 0 for null/invalid
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HandleId, Box<McTree>>> {
        // A panic inside a call (invariant violation) poisons the lock; the
        // other handles are still sound.
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, tree: McTree) -> HandleId {
        let handle_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(handle_id, Box::new(tree));
        handle_id
    }

    fn unregister(&self, handle_id: HandleId) -> Result<(), ErrorCode> {
        if handle_id == 0 {
            return Err(ErrorCode::InvalidHandle);
        }
        match self.lock().remove(&handle_id) {
            Some(_) => Ok(()),
            None => Err(ErrorCode::InvalidHandle),
        }
    }
}

static REGISTRY: OnceLock<HandleRegistry> = OnceLock::new();

fn get_registry() -> &'static HandleRegistry {
    REGISTRY.get_or_init(HandleRegistry::new)
}

/// Register a new tree and return its handle ID
pub fn register_handle(tree: McTree) -> HandleId {
    get_registry().register(tree)
}

/// Execute a function with a reference to the tree identified by handle_id
pub fn with_handle<T, F>(handle_id: HandleId, f: F) -> Result<T, ErrorCode>
where
    F: FnOnce(&McTree) -> T,
{
    let handles = get_registry().lock();
    match handles.get(&handle_id) {
        Some(tree) => Ok(f(tree)),
        None => Err(ErrorCode::InvalidHandle),
    }
}

/// Execute a function with a mutable reference to the tree identified by handle_id
pub fn with_handle_mut<T, F>(handle_id: HandleId, f: F) -> Result<T, ErrorCode>
where
    F: FnOnce(&mut McTree) -> T,
{
    let mut handles = get_registry().lock();
    match handles.get_mut(&handle_id) {
        Some(tree) => Ok(f(tree)),
        None => Err(ErrorCode::InvalidHandle),
    }
}

/// Unregister and drop a tree
pub fn unregister_handle(handle_id: HandleId) -> Result<(), ErrorCode> {
    get_registry().unregister(handle_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn test_handle_registry() {
        let id = register_handle(McTree::new(Config::default()).unwrap());
        assert_ne!(id, 0);
        assert_eq!(with_handle(id, |t| t.key_count()), Ok(0));
        with_handle_mut(id, |t| t.add(&[crate::Pair::exact(1)]).unwrap()).unwrap();
        assert_eq!(with_handle(id, |t| t.key_count()), Ok(1));

        assert!(unregister_handle(id).is_ok());
        assert_eq!(with_handle(id, |t| t.key_count()), Err(ErrorCode::InvalidHandle));
        assert!(unregister_handle(0).is_err());
        assert!(unregister_handle(id).is_err());
    }
}
