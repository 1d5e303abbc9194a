//! Checks on the layout of records copied between kernel and user space.

use shared::{ErrorKind, SysInfo};

#[test]
fn test_sysinfo_bytes_round_trip_through_user_view() {
    let info = SysInfo {
        free_memory: 3 * 4096,
        process_count: 2,
    };
    let bytes = info.as_bytes();
    assert_eq!(bytes.len(), 16, "Record should be two packed u64 fields");
    let seen_by_user: &SysInfo = bytemuck::from_bytes(bytes);
    assert_eq!(*seen_by_user, info);
}

#[test]
fn test_error_kind_numbers() {
    assert_eq!(ErrorKind::from_num(ErrorKind::OutOfMemory as u32), Some(ErrorKind::OutOfMemory));
    assert_eq!(ErrorKind::from_num(ErrorKind::Io as u32), Some(ErrorKind::Io));
    assert_eq!(ErrorKind::from_num(0), None);
    assert_eq!(ErrorKind::from_num(3), None);
}
