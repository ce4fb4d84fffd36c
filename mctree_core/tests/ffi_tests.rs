use mctree_core::errors::{mctree_last_error, mctree_strerror, ErrorCode};
use mctree_core::telemetry::mctree_register_stats_callback;
use mctree_core::*;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

fn new_tree(seed: u64) -> MctreeHandle {
    let cfg = MctreeConfigT {
        key_bits: 32,
        max_leaves: 64,
        min_pairs_for_split: 2,
        restart_after_steps: 0,
        validate_interval: 0,
        temperature: 1e-6,
        seed,
        has_seed: true,
    };
    let mut h: MctreeHandle = 0;
    assert_eq!(mctree_new(&cfg, &mut h), ErrorCode::Success);
    assert_ne!(h, 0);
    h
}

#[test]
fn lifecycle_and_membership() {
    let h = new_tree(1);
    let key = [Pair::exact(0x0a00_0001)];
    let mut fresh = false;
    assert_eq!(mctree_add(h, key.as_ptr(), 1, &mut fresh), ErrorCode::Success);
    assert!(fresh);
    assert_eq!(mctree_add(h, key.as_ptr(), 1, &mut fresh), ErrorCode::Success);
    assert!(!fresh);

    let mut n = 0u64;
    assert_eq!(mctree_key_count(h, &mut n), ErrorCode::Success);
    assert_eq!(n, 1);

    let mut gone = true;
    assert_eq!(mctree_delete(h, key.as_ptr(), 1, &mut gone), ErrorCode::Success);
    assert!(!gone);
    assert_eq!(mctree_delete(h, key.as_ptr(), 1, ptr::null_mut()), ErrorCode::Success);
    assert_eq!(mctree_delete(h, key.as_ptr(), 1, ptr::null_mut()), ErrorCode::KeyNotFound);
    assert_eq!(mctree_last_error(), ErrorCode::KeyNotFound);

    assert_eq!(mctree_validate(h), ErrorCode::Success);
    assert_eq!(mctree_last_error(), ErrorCode::Success);
    assert_eq!(mctree_free(h), ErrorCode::Success);
    assert_eq!(mctree_free(h), ErrorCode::InvalidHandle);
    assert_eq!(mctree_validate(h), ErrorCode::InvalidHandle);
}

#[test]
fn null_config_uses_defaults() {
    let mut h: MctreeHandle = 0;
    assert_eq!(mctree_new(ptr::null(), &mut h), ErrorCode::Success);
    let two = [Pair::exact(1), Pair::exact(2)];
    assert_eq!(mctree_add(h, two.as_ptr(), 2, ptr::null_mut()), ErrorCode::WrongKeyLength);
    assert_eq!(mctree_free(h), ErrorCode::Success);

    let bad = MctreeConfigT {
        key_bits: 0,
        max_leaves: 1,
        min_pairs_for_split: 1,
        restart_after_steps: 0,
        validate_interval: 0,
        temperature: 0.0,
        seed: 0,
        has_seed: false,
    };
    assert_eq!(mctree_new(&bad, &mut h), ErrorCode::InvalidConfig);
    assert_eq!(mctree_new(ptr::null(), ptr::null_mut()), ErrorCode::InvalidHandle);
}

#[test]
fn prefixes_and_search() {
    let h = new_tree(7);
    for i in 0..128 {
        let cidr = CString::new(format!("10.{}.{}.0/24", i / 16, i % 16)).unwrap();
        assert_eq!(mctree_add_prefix(h, cidr.as_ptr()), ErrorCode::Success);
    }
    let v6 = CString::new("2001:db8::/32").unwrap();
    assert_eq!(mctree_add_prefix(h, v6.as_ptr()), ErrorCode::InvalidPrefix);
    let junk = CString::new("10.0.0.0/99").unwrap();
    assert_eq!(mctree_add_prefix(h, junk.as_ptr()), ErrorCode::InvalidPrefix);
    assert_eq!(mctree_add_prefix(h, ptr::null()), ErrorCode::Utf8Error);

    let mut before = 0.0;
    assert_eq!(mctree_cost(h, &mut before), ErrorCode::Success);
    let mut improved_any = false;
    for _ in 0..2_000 {
        let mut improved = false;
        assert_eq!(mctree_step(h, &mut improved), ErrorCode::Success);
        improved_any |= improved;
    }
    let mut after = 0.0;
    assert_eq!(mctree_cost(h, &mut after), ErrorCode::Success);
    assert!(improved_any);
    assert!(after < before);
    assert_eq!(mctree_validate(h), ErrorCode::Success);

    let first = CString::new("10.0.0.0/24").unwrap();
    assert_eq!(mctree_delete_prefix(h, first.as_ptr()), ErrorCode::Success);
    let mut n = 0u64;
    mctree_key_count(h, &mut n);
    assert_eq!(n, 127);
    assert_eq!(mctree_free(h), ErrorCode::Success);
}

#[test]
fn save_and_restore_through_c_abi() {
    let dir = tempfile::tempdir().unwrap();
    let path = CString::new(dir.path().join("t.bin").to_str().unwrap()).unwrap();

    let a = new_tree(3);
    for i in 0..32 {
        let cidr = CString::new(format!("192.168.{i}.0/24")).unwrap();
        mctree_add_prefix(a, cidr.as_ptr());
    }
    for _ in 0..1_000 {
        mctree_step(a, ptr::null_mut());
    }
    assert_eq!(mctree_save(a, path.as_ptr()), ErrorCode::Success);
    assert_eq!(mctree_restore(a, path.as_ptr()), ErrorCode::RestoreNotEmpty);

    let b = new_tree(4);
    assert_eq!(mctree_restore(b, path.as_ptr()), ErrorCode::Success);
    assert_eq!(mctree_validate(b), ErrorCode::Success);
    mctree_free(a);
    mctree_free(b);
}

#[test]
fn strerror_strings() {
    let s = unsafe { CStr::from_ptr(mctree_strerror(ErrorCode::RestoreNotEmpty)) };
    assert_eq!(s.to_str().unwrap(), ErrorCode::RestoreNotEmpty.as_str());
}

#[test]
fn concurrent_handles() {
    let threads = num_cpus::get().clamp(2, 8);
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            thread::spawn(move || {
                let h = new_tree(t as u64);
                for i in 0..64u32 {
                    let key = [Pair::new(!0xff, (t as u32) << 24 | i << 8)];
                    assert_eq!(mctree_add(h, key.as_ptr(), 1, ptr::null_mut()), ErrorCode::Success);
                }
                for _ in 0..500 {
                    assert_eq!(mctree_step(h, ptr::null_mut()), ErrorCode::Success);
                }
                assert_eq!(mctree_validate(h), ErrorCode::Success);
                h
            })
        })
        .collect();

    let handles: Vec<MctreeHandle> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    for h in handles {
        let mut n = 0u64;
        assert_eq!(mctree_key_count(h, &mut n), ErrorCode::Success);
        assert_eq!(n, 64);
        assert_eq!(mctree_free(h), ErrorCode::Success);
    }
}

static CALLBACK_HITS: AtomicU64 = AtomicU64::new(0);

unsafe extern "C" fn count_metric(name: *const c_char, _value: f64) {
    let name = CStr::from_ptr(name).to_string_lossy();
    if name.starts_with("mctree_") {
        CALLBACK_HITS.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn stats_callback_sees_counters() {
    unsafe { mctree_register_stats_callback(count_metric) };
    let h = new_tree(9);
    let key = [Pair::exact(5)];
    mctree_add(h, key.as_ptr(), 1, ptr::null_mut());
    mctree_step(h, ptr::null_mut());
    assert!(CALLBACK_HITS.load(Ordering::Relaxed) > 0);
    mctree_free(h);
}
