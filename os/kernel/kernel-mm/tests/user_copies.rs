mod common;

use common::{allocator, arena, leaf};
use kernel_info::config::DuplicationPolicy;
use kernel_info::memory::{MAXVA, PAGE_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_mm::{VmError, Vmm};
use kernel_vmem::{AddressSpace, TranslateError};

#[test]
fn string_across_a_page_boundary_is_copied_with_its_terminator() {
    let ram = arena(16);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut space = vmm.create().unwrap();
    vmm.grow(&mut space, 2 * PAGE_SIZE).unwrap();

    let at = VirtualAddress::new(PAGE_SIZE - 3);
    vmm.copy_out(&mut space, at, b"hello\0").unwrap();

    let mut buf = [0xAA; 100];
    assert_eq!(vmm.copy_in_string(&space, &mut buf, at, 100), Ok(6));
    assert_eq!(&buf[..6], b"hello\0");
    assert_eq!(buf[6], 0xAA);

    vmm.destroy(space);
}

#[test]
fn string_without_terminator_within_the_limit_fails() {
    let ram = arena(16);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut space = vmm.create().unwrap();
    vmm.grow(&mut space, PAGE_SIZE).unwrap();
    vmm.copy_out(&mut space, VirtualAddress::new(0), b"hello\0").unwrap();

    let mut buf = [0; 100];
    assert_eq!(
        vmm.copy_in_string(&space, &mut buf, VirtualAddress::new(0), 5),
        Err(VmError::NoTerminator(5))
    );

    // The destination bounds the copy as well.
    let mut short = [0; 3];
    assert_eq!(
        vmm.copy_in_string(&space, &mut short, VirtualAddress::new(0), 100),
        Err(VmError::NoTerminator(3))
    );
    assert_eq!(&short, b"hel");

    vmm.destroy(space);
}

#[test]
fn string_running_off_user_memory_fails() {
    let ram = arena(16);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut space = vmm.create().unwrap();
    vmm.grow(&mut space, PAGE_SIZE).unwrap();
    vmm.copy_out(&mut space, VirtualAddress::new(PAGE_SIZE - 4), b"tail")
        .unwrap();

    let mut buf = [0; 64];
    assert_eq!(
        vmm.copy_in_string(&space, &mut buf, VirtualAddress::new(PAGE_SIZE - 4), 64),
        Err(VmError::BadAddress(TranslateError::Unmapped))
    );
    assert_eq!(&buf[..4], b"tail");

    vmm.destroy(space);
}

#[test]
fn partial_copy_out_keeps_what_was_written() {
    let ram = arena(16);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut space = vmm.create().unwrap();
    vmm.grow(&mut space, PAGE_SIZE).unwrap();

    let at = VirtualAddress::new(PAGE_SIZE - 4);
    assert_eq!(
        vmm.copy_out(&mut space, at, b"abcdefgh"),
        Err(VmError::BadAddress(TranslateError::Unmapped))
    );

    let mut buf = [0; 4];
    vmm.copy_in(&space, &mut buf, at).unwrap();
    assert_eq!(&buf, b"abcd");
    assert!(
        AddressSpace::from_root(&ram, space.root())
            .translate(VirtualAddress::new(PAGE_SIZE))
            .is_err()
    );

    vmm.destroy(space);
}

#[test]
fn hostile_addresses_are_errors() {
    let ram = arena(16);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut space = vmm.create().unwrap();
    vmm.grow(&mut space, 2 * PAGE_SIZE).unwrap();

    let mut buf = [0; 8];
    assert_eq!(
        vmm.copy_in(&space, &mut buf, VirtualAddress::new(MAXVA)),
        Err(VmError::BadAddress(TranslateError::OutOfRange))
    );
    assert_eq!(
        vmm.copy_out(&mut space, VirtualAddress::new(u64::MAX - 3), b"boom"),
        Err(VmError::BadAddress(TranslateError::OutOfRange))
    );
    assert_eq!(
        vmm.copy_in(&space, &mut buf, VirtualAddress::new(0x4000_0000)),
        Err(VmError::BadAddress(TranslateError::Unmapped))
    );

    // Stack guard page.
    vmm.clear_user_access(&mut space, VirtualAddress::new(0));
    assert_eq!(
        vmm.copy_in(&space, &mut buf, VirtualAddress::new(0)),
        Err(VmError::BadAddress(TranslateError::NotUser))
    );
    assert!(!leaf(&ram, space.root(), 0).user());
    vmm.copy_out(&mut space, VirtualAddress::new(PAGE_SIZE), b"fine")
        .unwrap();

    vmm.destroy(space);
    assert_eq!(pages.free_count(), 16);
}

#[test]
fn grow_with_too_few_pages_changes_nothing() {
    // root, two tables and the first page leave three free pages
    let ram = arena(7);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut space = vmm.create().unwrap();
    vmm.load_initial_image(&mut space, b"\x13\0\0\0").unwrap();
    assert_eq!(pages.free_count(), 3);

    let old = space.size();
    assert_eq!(
        vmm.grow(&mut space, old + 10 * PAGE_SIZE),
        Err(VmError::OutOfMemory)
    );
    assert_eq!(space.size(), old);
    assert_eq!(pages.free_count(), 3);

    let tables = AddressSpace::from_root(&ram, space.root());
    for n in 0..10 {
        let va = VirtualAddress::new(old + n * PAGE_SIZE);
        assert!(tables.translate(va).is_err(), "{va} still mapped");
    }

    // Growing within what is left still works.
    assert_eq!(vmm.grow(&mut space, old + 3 * PAGE_SIZE), Ok(old + 3 * PAGE_SIZE));
    assert_eq!(pages.free_count(), 0);

    vmm.destroy(space);
    assert_eq!(pages.free_count(), 7);
}

#[test]
fn dump_walks_the_whole_tree() {
    let ram = arena(16);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut space = vmm.create().unwrap();
    vmm.grow(&mut space, 2 * PAGE_SIZE).unwrap();

    vmm.dump(&space);
    let mut text = String::new();
    AddressSpace::from_root(&ram, space.root())
        .dump(&mut text)
        .unwrap();
    assert_eq!(text.lines().count(), 1 + 4);
    assert!(text.lines().nth(4).unwrap().starts_with(" .. .. ..1: pte 0x"));

    vmm.destroy(space);
}
