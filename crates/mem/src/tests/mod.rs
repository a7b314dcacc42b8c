// Cross-module unit tests for the MMU.
//
// All suites drive a real `Mmu` over `MockCpu` from `test-support`; host memory is plain `Vec<u8>`.

extern crate test_support;

use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;

use test_support::mock::cpu::MockCpu;

use crate::{
    Asid, AssignFlags, EmulatorConfig, MemModelType, Mmu, PageTableAllocator, RolloverPolicy,
    VmAddress,
};

mod access;
mod mapping;

/// Externally owned collaborators of one MMU instance.
struct Fixture {
    alloc: PageTableAllocator,
    cpu: MockCpu,
    conf: EmulatorConfig,
}

impl Fixture {
    fn new() -> Self {
        Self::with_conf(EmulatorConfig::default())
    }

    fn with_policy(policy: RolloverPolicy) -> Self {
        Self::with_conf(EmulatorConfig {
            rollover_policy: policy,
            ..EmulatorConfig::default()
        })
    }

    fn with_conf(conf: EmulatorConfig) -> Self {
        Self {
            alloc: PageTableAllocator::new(),
            cpu: MockCpu::new(),
            conf,
        }
    }

    fn mmu(&self, bits: usize, mem_map_old: bool, model: MemModelType) -> Mmu<'_> {
        Mmu::new(&self.alloc, &self.cpu, &self.conf, bits, mem_map_old, model)
            .unwrap_or_else(|err| panic!("mmu construction failed: {:?}", err))
    }

    /// 4 KiB pages, modern map, multiple model.
    fn modern(&self) -> Mmu<'_> {
        self.mmu(12, false, MemModelType::Multiple)
    }

    /// 4 KiB pages, legacy map, moving model.
    fn legacy(&self) -> Mmu<'_> {
        self.mmu(12, true, MemModelType::Moving)
    }
}

/// Host-side backing buffer.
struct HostBuf {
    data: Vec<u8>,
    ptr: NonNull<u8>,
}

impl HostBuf {
    fn new(len: usize) -> Self {
        let mut data = vec![0u8; len];
        let ptr = NonNull::new(data.as_mut_ptr()).unwrap();
        Self { data, ptr }
    }

    fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn at(&self, offset: usize) -> *mut u8 {
        self.ptr.as_ptr().wrapping_add(offset)
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Rolls over a space, places one fresh table at `base` for it and makes it current.
fn setup_space(mmu: &Mmu<'_>, base: VmAddress) -> Asid {
    let asid = mmu.rollover_fresh_addr_space().unwrap();
    place_local(mmu, asid, base);
    mmu.set_current_addr_space(asid).unwrap();
    asid
}

/// Places a fresh table at `base` local to `asid`.
fn place_local(mmu: &Mmu<'_>, asid: Asid, base: VmAddress) {
    let table = mmu.create_new_page_table().unwrap();
    mmu.assign_page_table(table, base, AssignFlags::LOCAL_GLOBAL_REGION, Some(&[asid]))
        .unwrap();
}

/// Places a fresh table at `base` in the global directory.
fn place_global(mmu: &Mmu<'_>, base: VmAddress) {
    let table = mmu.create_new_page_table().unwrap();
    mmu.assign_page_table(table, base, AssignFlags::GLOBAL, None)
        .unwrap();
}

/// Maps `buf` at `addr` in the current view.
fn map(mmu: &Mmu<'_>, addr: VmAddress, buf: &HostBuf, size: usize, prot: crate::Prot) {
    // SAFETY: test buffers outlive every access made through the MMU.
    unsafe { mmu.map_to_host_cpu(addr, size, buf.ptr(), prot) }.unwrap();
}
