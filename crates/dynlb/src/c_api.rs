//! Thin FFI shim over the safe Rust core, matching the C host application's
//! original `dynlb.h` contract: `dynlb_morton_balance`, `dynlb_create`,
//! `dynlb_point_assign`, `dynlb_box_assign`, `dynlb_update`, `dynlb_destroy`.
//! A panic cannot safely unwind across this boundary, so fallible paths are
//! translated to a sentinel return value rather than propagated.

use mpi::ffi::MPI_Comm;
use mpi::topology::UserCommunicator;
use mpi::traits::*;

use crate::balancer::{self, Balancer};
use crate::config::{Config, Mode};
use crate::point::Point;

unsafe fn comm_from_raw(comm: MPI_Comm) -> UserCommunicator {
    UserCommunicator::from_raw(comm).expect("caller passed a valid MPI_Comm")
}

unsafe fn points_from_raw(coords: *const [f64; 3], n: usize) -> Vec<Point> {
    std::slice::from_raw_parts(coords, n)
        .iter()
        .enumerate()
        .map(|(i, c)| Point::new(*c, i as u64))
        .collect()
}

/// `void dynlb_morton_balance(int n, REAL *point[3], int ranks[])`.
/// `ranks` must point to at least `n` writable `i32` slots.
#[no_mangle]
pub extern "C" fn dynlb_morton_balance(
    comm: MPI_Comm,
    n: i32,
    point: *const [f64; 3],
    ranks: *mut i32,
) {
    if n < 0 || point.is_null() || ranks.is_null() {
        return;
    }
    let comm = unsafe { comm_from_raw(comm) };
    let points = unsafe { points_from_raw(point, n as usize) };
    let out = unsafe { std::slice::from_raw_parts_mut(ranks, n as usize) };

    match balancer::morton_balance(&comm, &points) {
        Ok(assignment) => {
            for (slot, worker) in out.iter_mut().zip(assignment.into_iter()) {
                *slot = worker as i32;
            }
        }
        Err(err) => {
            tracing::warn!(%err, "dynlb_morton_balance failed");
        }
    }
}

/// Opaque handle, matching the original `typedef void* dynlb;`.
pub struct DynlbHandle {
    balancer: Balancer,
}

/// `dynlb dynlb_create(int ntasks, int n, REAL *point[3])`, generalised with
/// the cutoff/epsilon parameters the host application's later revision
/// passes (see `original_source/test.c`'s call site) plus a `rcb_mode` flag
/// selecting the second partitioner this balancer supports. Returns null on
/// failure.
#[no_mangle]
pub extern "C" fn dynlb_create(
    comm: MPI_Comm,
    n: i32,
    point: *const [f64; 3],
    cutoff: i64,
    epsilon: f64,
    rcb_mode: bool,
) -> *mut DynlbHandle {
    if n < 0 || point.is_null() {
        return std::ptr::null_mut();
    }
    let comm = unsafe { comm_from_raw(comm) };
    let points = unsafe { points_from_raw(point, n as usize) };
    let mode = if rcb_mode { Mode::Rcb } else { Mode::Radix };
    let config = Config::new(0, cutoff, epsilon, mode);

    match Balancer::create(comm, &points, config) {
        Ok(balancer) => Box::into_raw(Box::new(DynlbHandle { balancer })),
        Err(err) => {
            tracing::warn!(%err, "dynlb_create failed");
            std::ptr::null_mut()
        }
    }
}

/// `int dynlb_point_assign(dynlb lb, REAL point[])`.
#[no_mangle]
pub extern "C" fn dynlb_point_assign(lb: *const DynlbHandle, point: *const f64) -> i32 {
    if lb.is_null() || point.is_null() {
        return -1;
    }
    let handle = unsafe { &*lb };
    let coords = unsafe { std::slice::from_raw_parts(point, 3) };
    let p = Point::new([coords[0], coords[1], coords[2]], 0);
    handle.balancer.point_assign(&p) as i32
}

/// `int dynlb_box_assign(dynlb lb, REAL lo[], REAL hi[], int ranks[])`.
/// `ranks` must point to at least `worker_count` writable `i32` slots; the
/// return value is the number written.
#[no_mangle]
pub extern "C" fn dynlb_box_assign(
    lb: *const DynlbHandle,
    lo: *const f64,
    hi: *const f64,
    ranks: *mut i32,
) -> i32 {
    if lb.is_null() || lo.is_null() || hi.is_null() || ranks.is_null() {
        return -1;
    }
    let handle = unsafe { &*lb };
    let lo = unsafe { std::slice::from_raw_parts(lo, 3) };
    let hi = unsafe { std::slice::from_raw_parts(hi, 3) };
    let mut out = Vec::new();
    let count = handle
        .balancer
        .box_assign([lo[0], lo[1], lo[2]], [hi[0], hi[1], hi[2]], &mut out);

    let dest = unsafe { std::slice::from_raw_parts_mut(ranks, count) };
    for (slot, worker) in dest.iter_mut().zip(out.into_iter()) {
        *slot = worker as i32;
    }
    count as i32
}

/// `void dynlb_update(dynlb lb, int n, REAL *point[3])`.
#[no_mangle]
pub extern "C" fn dynlb_update(lb: *mut DynlbHandle, n: i32, point: *const [f64; 3]) {
    if lb.is_null() || n < 0 || point.is_null() {
        return;
    }
    let handle = unsafe { &mut *lb };
    let points = unsafe { points_from_raw(point, n as usize) };
    if let Err(err) = handle.balancer.update(&points) {
        tracing::warn!(%err, "dynlb_update failed");
    }
}

/// `void dynlb_destroy(dynlb lb)`.
#[no_mangle]
pub extern "C" fn dynlb_destroy(lb: *mut DynlbHandle) {
    if lb.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(lb));
    }
}
