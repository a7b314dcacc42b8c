use crate::{AssignFlags, EmulatorConfig, MemModelType, MmuError, Prot};

use super::{Fixture, HostBuf, map, setup_space};

#[test]
fn test_u32_round_trip() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x1000);
    map(&mmu, 0x4000_0000, &buf, 0x1000, Prot::READ_WRITE);

    mmu.write_u32(0x4000_0010, 0x1122_3344).unwrap();
    assert_eq!(mmu.read_u32(0x4000_0010), Ok(0x1122_3344));
    assert_eq!(mmu.read_u8(0x4000_0010), Ok(0x44));
    assert_eq!(mmu.read_u16(0x4000_0012), Ok(0x1122));
    // 页内非对齐读取
    assert_eq!(mmu.read_u32(0x4000_0011), Ok(0x0011_2233));
    assert_eq!(&buf.bytes()[0x10..0x14], &[0x44, 0x33, 0x22, 0x11]);

    mmu.write_u64(0x4000_0FF8, u64::MAX).unwrap();
    assert_eq!(mmu.read_u64(0x4000_0FF8), Ok(u64::MAX));
    mmu.write_u16(0x4000_0101, 0xBEEF).unwrap();
    assert_eq!(mmu.read_u16(0x4000_0101), Ok(0xBEEF));
    mmu.write_u8(0x4000_0FFF, 0x7F).unwrap();
    assert_eq!(mmu.read_u8(0x4000_0FFF), Ok(0x7F));
}

#[test]
fn test_cross_page_access_is_stitched() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    let low = HostBuf::new(0x1000);
    let high = HostBuf::new(0x1000);
    map(&mmu, 0x4000_0000, &low, 0x1000, Prot::READ_WRITE);
    map(&mmu, 0x4000_1000, &high, 0x1000, Prot::READ_WRITE);

    mmu.write_u64(0x4000_0FFC, 0x0102_0304_0506_0708).unwrap();
    assert_eq!(mmu.read_u64(0x4000_0FFC), Ok(0x0102_0304_0506_0708));
    assert_eq!(&low.bytes()[0xFFC..], &[0x08, 0x07, 0x06, 0x05]);
    assert_eq!(&high.bytes()[..4], &[0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_failed_cross_page_write_writes_nothing() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x1000);
    map(&mmu, 0x4000_0000, &buf, 0x1000, Prot::READ_WRITE);

    assert_eq!(
        mmu.write_u32(0x4000_0FFE, 0xAABB_CCDD),
        Err(MmuError::NotMapped(0x4000_1000))
    );
    assert_eq!(&buf.bytes()[0xFFE..], &[0, 0]);
    assert_eq!(mmu.read_u32(0x4000_0FFE), Err(MmuError::NotMapped(0x4000_1000)));
}

#[test]
fn test_permissions() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    let ro = HostBuf::new(0x1000);
    let wo = HostBuf::new(0x1000);
    map(&mmu, 0x4000_0000, &ro, 0x1000, Prot::READ);
    map(&mmu, 0x4000_1000, &wo, 0x1000, Prot::WRITE);

    assert_eq!(mmu.read_u32(0x4000_0000), Ok(0));
    assert_eq!(
        mmu.write_u8(0x4000_0004, 1),
        Err(MmuError::PermissionDenied(0x4000_0004))
    );
    mmu.write_u8(0x4000_1004, 1).unwrap();
    assert_eq!(mmu.read_u8(0x4000_1004), Err(MmuError::PermissionDenied(0x4000_1004)));

    // 跨页写在第一页就被拒绝
    assert_eq!(
        mmu.write_u16(0x4000_0FFF, 0xFFFF),
        Err(MmuError::PermissionDenied(0x4000_0FFF))
    );
    assert_eq!(wo.bytes()[0], 0);
}

#[test]
fn test_bytes_across_three_pages() {
    let fx = Fixture::with_conf(EmulatorConfig {
        log_read: true,
        log_write: true,
        ..EmulatorConfig::default()
    });
    let mmu = fx.modern();
    setup_space(&mmu, 0x4000_0000);
    let buf = HostBuf::new(0x3000);
    map(&mmu, 0x4000_0000, &buf, 0x3000, Prot::READ_WRITE);

    let data: alloc::vec::Vec<u8> = (0..0x2100u32).map(|i| i as u8).collect();
    mmu.write_bytes(0x4000_0F00, &data).unwrap();
    let mut back = alloc::vec![0u8; data.len()];
    mmu.read_bytes(0x4000_0F00, &mut back).unwrap();
    assert_eq!(back, data);
    assert_eq!(&buf.bytes()[0xF00..0x3000], &data[..]);
}

#[test]
fn test_one_megabyte_pages() {
    let fx = Fixture::new();
    let mmu = fx.mmu(20, false, MemModelType::Multiple);
    let asid = mmu.rollover_fresh_addr_space().unwrap();
    mmu.set_current_addr_space(asid).unwrap();
    let table = mmu.create_new_page_table().unwrap();
    assert_eq!(
        mmu.assign_page_table(table, 0x4010_0000, AssignFlags::LOCAL_GLOBAL_REGION, None),
        Err(MmuError::Unaligned)
    );
    mmu.assign_page_table(table, 0x4000_0000, AssignFlags::LOCAL_GLOBAL_REGION, None)
        .unwrap();

    let buf = HostBuf::new(0x10_0000);
    unsafe {
        assert_eq!(
            mmu.map_to_host_cpu(0x4000_1000, 0x10_0000, buf.ptr(), Prot::READ),
            Err(MmuError::Unaligned)
        );
    }
    map(&mmu, 0x4010_0000, &buf, 0x10_0000, Prot::READ_WRITE);

    mmu.write_u16(0x401F_FFFE, 0xCAFE).unwrap();
    assert_eq!(mmu.read_u16(0x401F_FFFE), Ok(0xCAFE));
    assert_eq!(mmu.get_host_pointer(asid, 0x4010_0042).unwrap().as_ptr(), buf.at(0x42));
    assert_eq!(mmu.read_u8(0x4020_0000), Err(MmuError::NotMapped(0x4020_0000)));
    assert_eq!(mmu.read_u8(0x400F_FFFF), Err(MmuError::NotMapped(0x400F_FFFF)));
}

#[test]
fn test_scenario_read_outside_mapped_page() {
    let fx = Fixture::new();
    let mmu = fx.modern();
    let asid = mmu.rollover_fresh_addr_space().unwrap();
    assert_eq!(asid.raw(), 1);

    let table = mmu.create_new_page_table().unwrap();
    mmu.assign_page_table(table, 0x4000_0000, AssignFlags::LOCAL_GLOBAL_REGION, Some(&[asid]))
        .unwrap();
    mmu.set_current_addr_space(asid).unwrap();
    let buf = HostBuf::new(4096);
    map(&mmu, 0x4000_0000, &buf, 4096, Prot::READ_WRITE);

    assert_eq!(mmu.read_u32(0x4000_1000), Err(MmuError::NotMapped(0x4000_1000)));
    assert_eq!(mmu.read_u32(0x4000_0000), Ok(0));
}
