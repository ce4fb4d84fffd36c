use crate::{
    errors::{map_error, set_last_error, ErrorCode},
    handle_registry::{register_handle, unregister_handle, with_handle, with_handle_mut, HandleId},
    helpers::prefix_key,
    Config, Error, McTree, Pair,
};
use ipnet::IpNet;
use log::error;
use std::{
    ffi::CStr,
    os::raw::c_char,
    panic::{catch_unwind, AssertUnwindSafe},
};

/// Opaque handle; 0 is never valid.
pub type MctreeHandle = HandleId;

/// Construction parameters.  Mirrors [`Config`]; `has_seed == false` seeds
/// from the OS.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MctreeConfigT {
    pub key_bits: u32,
    pub max_leaves: u64,
    pub min_pairs_for_split: u64,
    pub restart_after_steps: u64,
    pub validate_interval: u64,
    pub temperature: f64,
    pub seed: u64,
    pub has_seed: bool,
}

impl From<&MctreeConfigT> for Config {
    fn from(c: &MctreeConfigT) -> Self {
        Config {
            key_bits: c.key_bits,
            max_leaves: c.max_leaves as usize,
            min_pairs_for_split: c.min_pairs_for_split as usize,
            restart_after_steps: c.restart_after_steps,
            validate_interval: c.validate_interval,
            temperature: c.temperature,
            seed: c.has_seed.then_some(c.seed),
        }
    }
}

// ─────────────────────────── helpers ─────────────────────────────────── //

#[inline]
fn cstr<'a>(p: *const c_char) -> Result<&'a str, ErrorCode> {
    if p.is_null() {
        return Err(ErrorCode::Utf8Error);
    }
    unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|_| ErrorCode::Utf8Error)
}

#[inline]
fn pairs<'a>(p: *const Pair, n: usize) -> Result<&'a [Pair], ErrorCode> {
    if p.is_null() {
        return Err(ErrorCode::WrongKeyLength);
    }
    Ok(unsafe { std::slice::from_raw_parts(p, n) })
}

#[inline]
fn write_out<T>(out: *mut T, v: T) {
    if !out.is_null() {
        unsafe { *out = v };
    }
}

/// Record `r` as this thread's last error and return its code.
#[inline]
fn finish(r: Result<(), ErrorCode>) -> ErrorCode {
    let code = r.err().unwrap_or(ErrorCode::Success);
    set_last_error(code);
    code
}

#[inline]
fn lift<T>(r: Result<T, Error>) -> Result<T, ErrorCode> {
    r.map_err(|e| map_error(&e))
}

/// Run `f`, turning an internal-consistency panic into
/// `InvariantViolation` instead of unwinding into C.  The tree must be freed
/// afterwards.
fn guarded<T>(h: MctreeHandle, f: impl FnOnce() -> Result<T, ErrorCode>) -> Result<T, ErrorCode> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("[PANIC] handle {h}: internal invariant broken");
        Err(ErrorCode::InvariantViolation)
    })
}

fn prefix(h: MctreeHandle, cidr_utf8: *const c_char, is_del: bool) -> Result<bool, ErrorCode> {
    let net: IpNet = cstr(cidr_utf8)?.parse().map_err(|_| ErrorCode::InvalidPrefix)?;
    with_handle_mut(h, |t| {
        let key = prefix_key(&net, t.config().words_per_key()).ok_or(ErrorCode::InvalidPrefix)?;
        lift(t.add_del(&key, is_del))
    })?
}

// ─── small helper to turn Result<T,ErrorCode> into early-return ──────────
macro_rules! try_c { ($expr:expr) => { match $expr {
    Ok(v)  => v,
    Err(e) => return finish(Err(e)),
}}}

// ───────────────────────── lifetime ──────────────────────────────────── //

/// Create a tree.  `cfg` may be NULL for defaults.  Stores the handle in
/// `*out` on success.
#[no_mangle]
pub extern "C" fn mctree_new(cfg: *const MctreeConfigT, out: *mut MctreeHandle) -> ErrorCode {
    if out.is_null() {
        return finish(Err(ErrorCode::InvalidHandle));
    }
    let config = match unsafe { cfg.as_ref() } {
        Some(c) => Config::from(c),
        None => Config::default(),
    };
    let tree = try_c!(lift(McTree::new(config)));
    unsafe { *out = register_handle(tree) };
    finish(Ok(()))
}

#[no_mangle]
pub extern "C" fn mctree_free(h: MctreeHandle) -> ErrorCode {
    finish(unregister_handle(h))
}

// ───────────────────────── membership ────────────────────────────────── //

/// Add one reference to the key `pairs[0..n_pairs]`.  `*out_new` (may be
/// NULL) is set when the key was not present before.
#[no_mangle]
pub extern "C" fn mctree_add(
    h: MctreeHandle,
    key: *const Pair,
    n_pairs: usize,
    out_new: *mut bool,
) -> ErrorCode {
    let key = try_c!(pairs(key, n_pairs));
    let added = try_c!(guarded(h, || with_handle_mut(h, |t| lift(t.add(key))).and_then(|r| r)));
    write_out(out_new, added);
    finish(Ok(()))
}

/// Drop one reference.  `*out_removed` (may be NULL) is set when that was
/// the last one.
#[no_mangle]
pub extern "C" fn mctree_delete(
    h: MctreeHandle,
    key: *const Pair,
    n_pairs: usize,
    out_removed: *mut bool,
) -> ErrorCode {
    let key = try_c!(pairs(key, n_pairs));
    let removed = try_c!(guarded(h, || with_handle_mut(h, |t| lift(t.delete(key))).and_then(|r| r)));
    write_out(out_removed, removed);
    finish(Ok(()))
}

/// `mctree_add` for a CIDR string such as `"10.1.0.0/16"`.
#[no_mangle]
pub extern "C" fn mctree_add_prefix(h: MctreeHandle, cidr_utf8: *const c_char) -> ErrorCode {
    finish(guarded(h, || prefix(h, cidr_utf8, false)).map(drop))
}

#[no_mangle]
pub extern "C" fn mctree_delete_prefix(h: MctreeHandle, cidr_utf8: *const c_char) -> ErrorCode {
    finish(guarded(h, || prefix(h, cidr_utf8, true)).map(drop))
}

// ───────────────────────── search ────────────────────────────────────── //

/// One search step.  A failed periodic validation is reported as
/// `InvariantViolation`.
#[no_mangle]
pub extern "C" fn mctree_step(h: MctreeHandle, out_improved: *mut bool) -> ErrorCode {
    let improved = try_c!(guarded(h, || with_handle_mut(h, |t| t.step())));
    write_out(out_improved, improved);
    finish(Ok(()))
}

#[no_mangle]
pub extern "C" fn mctree_validate(h: MctreeHandle) -> ErrorCode {
    let r = try_c!(with_handle(h, |t| t.validate()));
    finish(r.map_err(|e| {
        error!("[VALIDATE] handle {h}: {e}");
        ErrorCode::InvariantViolation
    }))
}

// ───────────────────── inspection & persistence ──────────────────────── //

#[no_mangle]
pub extern "C" fn mctree_cost(h: MctreeHandle, out: *mut f64) -> ErrorCode {
    if out.is_null() {
        return finish(Err(ErrorCode::InvalidHandle));
    }
    let c = try_c!(with_handle(h, |t| t.cost().cost));
    write_out(out, c);
    finish(Ok(()))
}

#[no_mangle]
pub extern "C" fn mctree_key_count(h: MctreeHandle, out: *mut u64) -> ErrorCode {
    if out.is_null() {
        return finish(Err(ErrorCode::InvalidHandle));
    }
    let n = try_c!(with_handle(h, |t| t.key_count() as u64));
    write_out(out, n);
    finish(Ok(()))
}

#[no_mangle]
pub extern "C" fn mctree_save(h: MctreeHandle, path_utf8: *const c_char) -> ErrorCode {
    let path = try_c!(cstr(path_utf8));
    finish(with_handle(h, |t| lift(t.save(path))).and_then(|r| r))
}

#[no_mangle]
pub extern "C" fn mctree_restore(h: MctreeHandle, path_utf8: *const c_char) -> ErrorCode {
    let path = try_c!(cstr(path_utf8));
    finish(guarded(h, || with_handle_mut(h, |t| lift(t.restore(path))).and_then(|r| r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use std::ffi::CString;
    use std::ptr;

    #[test]
    fn hot_path_panics_become_error_codes() {
        let mut h: MctreeHandle = 0;
        assert_eq!(mctree_new(ptr::null(), &mut h), ErrorCode::Success);
        let key = [Pair::exact(0x0a00_0001)];
        assert_eq!(mctree_add(h, key.as_ptr(), 1, ptr::null_mut()), ErrorCode::Success);
        let cidr = CString::new("10.0.0.1/32").unwrap();
        assert_eq!(mctree_add_prefix(h, cidr.as_ptr()), ErrorCode::Success);

        // Detach the root's member set so the key can no longer be found.
        with_handle_mut(h, |t| {
            let root = t.trees.baseline.root;
            t.nodes.get_mut(root).kind = NodeKind::Leaf(None);
        })
        .unwrap();

        assert_eq!(
            mctree_delete_prefix(h, cidr.as_ptr()),
            ErrorCode::Success,
            "a shared key only drops a reference"
        );
        assert_eq!(
            mctree_delete(h, key.as_ptr(), 1, ptr::null_mut()),
            ErrorCode::InvariantViolation
        );
        assert_eq!(crate::errors::get_last_error(), ErrorCode::InvariantViolation);

        // The registry survives the poisoned lock.
        let mut n = 0u64;
        assert_eq!(mctree_key_count(h, &mut n), ErrorCode::Success);
        assert_eq!(mctree_free(h), ErrorCode::Success);
    }
}
