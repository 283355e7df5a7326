//! End-to-end creation properties: shape echo, empty-array backing,
//! overflow rejection, and relaxed contiguity.

use std::sync::Arc;

use manta_core::prelude::*;
use manta_core::{register_accelerator, SysMemory, MAXDIMS};

fn accel(idx: usize) -> Device {
    register_accelerator(idx, Arc::new(SysMemory::new()));
    Device::Accel(idx)
}

#[test]
fn create_echoes_shape_and_rank() {
    let shapes: &[&[isize]] = &[&[], &[1], &[5], &[2, 3], &[4, 1, 7], &[1, 1, 1, 1]];
    for dims in shapes {
        for device in [Device::Host, accel(0)] {
            let a = Array::empty(device, dims, Some(DType::int64()), MemoryOrder::C).unwrap();
            assert_eq!(a.ndim(), dims.len());
            let expect: Vec<usize> = dims.iter().map(|&d| d as usize).collect();
            assert_eq!(a.shape().dims(), expect.as_slice());
        }
    }
}

#[test]
fn max_rank_accepted_beyond_rejected() {
    let dims = vec![1isize; MAXDIMS];
    assert!(Array::empty(Device::Host, &dims, None, MemoryOrder::C).is_ok());

    let dims = vec![1isize; MAXDIMS + 1];
    assert!(matches!(
        Array::empty(Device::Host, &dims, None, MemoryOrder::C),
        Err(MantaError::OutOfRange { .. })
    ));
}

#[test]
fn empty_arrays_keep_a_real_buffer() {
    for dims in [&[0isize][..], &[0, 4][..], &[3, 0, 5][..]] {
        let a = Array::zeros(Device::Host, dims, Some(DType::float64()), MemoryOrder::C).unwrap();
        assert!(a.is_empty());
        assert_eq!(a.numel(), 0);
        assert!(a.buffer().host_ptr().is_some());
        assert!(a.buffer().nbytes() >= a.dtype().elsize());
    }
}

#[test]
fn oversized_array_fails_before_allocating() {
    let big = 1isize << 31;
    let err = Array::empty(
        Device::Host,
        &[big, big, 4],
        Some(DType::float64()),
        MemoryOrder::C,
    )
    .unwrap_err();
    assert!(matches!(err, MantaError::SizeOverflow));
}

#[test]
fn all_degenerate_shape_is_contiguous_both_ways() {
    for order in [MemoryOrder::C, MemoryOrder::Fortran] {
        let a = Array::empty(Device::Host, &[1, 1, 1], Some(DType::float32()), order).unwrap();
        assert!(a.flags().contains(ArrayFlags::C_CONTIGUOUS));
        assert!(a.flags().contains(ArrayFlags::F_CONTIGUOUS));
    }
}

#[test]
fn fresh_allocations_own_their_data() {
    let a = Array::zeros(accel(0), &[3], Some(DType::int32()), MemoryOrder::C).unwrap();
    assert!(a.owns_data());
    let v = a.view();
    assert!(!v.owns_data());
    assert!(v.shares_buffer(&a));
}
