use crate::{MmuError, Prot};

use super::{Fixture, HostBuf, map, place_global, setup_space};

#[test]
fn test_mapping_resolves_every_offset() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    let asid = setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x2000);
    map(&mmu, 0x4000_1000, &buf, 0x2000, Prot::READ_WRITE);

    for off in [0usize, 1, 0xFFF, 0x1000, 0x1FFF] {
        let host = mmu.get_host_pointer(asid, 0x4000_1000 + off as u32).unwrap();
        assert_eq!(host.as_ptr(), buf.at(off));
    }
    assert_eq!(
        mmu.get_host_pointer(asid, 0x4000_0FFF),
        Err(MmuError::NotMapped(0x4000_0FFF))
    );
    assert_eq!(
        mmu.get_host_pointer(asid, 0x4000_3000),
        Err(MmuError::NotMapped(0x4000_3000))
    );
    assert_eq!(fx.cpu.map_calls(), 1);
    assert_eq!(fx.cpu.mapped_bytes(), 0x2000);
}

#[test]
fn test_overlap_rejected() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    let a = HostBuf::new(0x2000);
    let b = HostBuf::new(0x1000);
    map(&mmu, 0x4000_0000, &a, 0x2000, Prot::READ_WRITE);

    let err = unsafe { mmu.map_to_host_cpu(0x4000_1000, 0x1000, b.ptr(), Prot::READ) };
    assert_eq!(err, Err(MmuError::Overlap(0x4000_1000)));
    assert_eq!(mmu.host_mapping_count(), 1);

    // 相邻不算重叠
    map(&mmu, 0x4000_2000, &b, 0x1000, Prot::READ);
    assert_eq!(mmu.host_mapping_count(), 2);
}

#[test]
fn test_misaligned_and_empty_ranges() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x2000);

    unsafe {
        assert_eq!(
            mmu.map_to_host_cpu(0x4000_0800, 0x1000, buf.ptr(), Prot::READ),
            Err(MmuError::Unaligned)
        );
        assert_eq!(
            mmu.map_to_host_cpu(0x4000_0000, 0x800, buf.ptr(), Prot::READ),
            Err(MmuError::Unaligned)
        );
        assert_eq!(
            mmu.map_to_host_cpu(0x4000_0000, 0, buf.ptr(), Prot::READ),
            Err(MmuError::InvalidSize)
        );
    }
    assert_eq!(mmu.unmap_from_host_cpu(0x4000_0800, 0x1000), Err(MmuError::Unaligned));
    assert_eq!(mmu.host_mapping_count(), 0);
}

#[test]
fn test_missing_page_table_commits_nothing() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    let asid = setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x2000);

    let err = unsafe { mmu.map_to_host_cpu(0x400F_F000, 0x2000, buf.ptr(), Prot::READ) };
    assert_eq!(err, Err(MmuError::NoPageTable(0x4010_0000)));
    assert_eq!(
        mmu.get_host_pointer(asid, 0x400F_F000),
        Err(MmuError::NotMapped(0x400F_F000))
    );
    assert_eq!(mmu.host_mapping_count(), 0);
    assert_eq!(fx.cpu.map_calls(), 0);
}

#[test]
fn test_range_across_scopes_rejected() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    place_global(&mmu, 0x4010_0000);
    let buf = HostBuf::new(0x2000);

    let err = unsafe { mmu.map_to_host_cpu(0x400F_F000, 0x2000, buf.ptr(), Prot::READ) };
    assert_eq!(err, Err(MmuError::ScopeMismatch));
    assert_eq!(mmu.host_mapping_count(), 0);
}

#[test]
fn test_cpu_rejection_commits_nothing() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    let asid = setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x1000);

    fx.cpu.reject_next_map();
    let err = unsafe { mmu.map_to_host_cpu(0x4000_0000, 0x1000, buf.ptr(), Prot::READ) };
    assert_eq!(err, Err(MmuError::CpuRejected));
    assert!(mmu.get_host_pointer(asid, 0x4000_0000).is_err());
    assert_eq!(mmu.host_mapping_count(), 0);

    map(&mmu, 0x4000_0000, &buf, 0x1000, Prot::READ);
    assert_eq!(mmu.get_host_pointer(asid, 0x4000_0000).unwrap(), buf.ptr());
}

#[test]
fn test_unmap_union_of_whole_mappings() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    let asid = setup_space(&mmu, 0x4000_0000);
    let a = HostBuf::new(0x1000);
    let b = HostBuf::new(0x1000);
    map(&mmu, 0x4000_0000, &a, 0x1000, Prot::READ);
    map(&mmu, 0x4000_1000, &b, 0x1000, Prot::READ);

    mmu.unmap_from_host_cpu(0x4000_0000, 0x2000).unwrap();
    for addr in [0x4000_0000, 0x4000_0FFF, 0x4000_1000, 0x4000_1FFF] {
        assert_eq!(mmu.get_host_pointer(asid, addr), Err(MmuError::NotMapped(addr)));
    }
    assert_eq!(mmu.host_mapping_count(), 0);
    assert_eq!(fx.cpu.unmap_calls(), 1);
    assert_eq!(fx.cpu.mapped_bytes(), 0);

    // 解除后可以重新映射
    map(&mmu, 0x4000_0000, &b, 0x1000, Prot::READ);
    assert_eq!(mmu.get_host_pointer(asid, 0x4000_0000).unwrap(), b.ptr());
}

#[test]
fn test_partial_unmap_rejected() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    let asid = setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x2000);
    map(&mmu, 0x4000_0000, &buf, 0x2000, Prot::READ);

    assert_eq!(mmu.unmap_from_host_cpu(0x4000_0000, 0x1000), Err(MmuError::PartialUnmap));
    assert_eq!(mmu.unmap_from_host_cpu(0x4000_1000, 0x1000), Err(MmuError::PartialUnmap));
    assert_eq!(mmu.unmap_from_host_cpu(0x4000_0000, 0x3000), Err(MmuError::PartialUnmap));
    assert_eq!(mmu.unmap_from_host_cpu(0x4000_5000, 0x1000), Err(MmuError::PartialUnmap));
    assert_eq!(
        mmu.unmap_from_host_cpu(0x5000_0000, 0x1000),
        Err(MmuError::NotMapped(0x5000_0000))
    );

    for addr in [0x4000_0000, 0x4000_1FFF] {
        assert!(mmu.get_host_pointer(asid, addr).is_ok());
    }
    assert_eq!(mmu.host_mapping_count(), 1);
    assert_eq!(fx.cpu.unmap_calls(), 0);
}
