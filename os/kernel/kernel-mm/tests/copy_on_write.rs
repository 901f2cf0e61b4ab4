mod common;

use common::{allocator, arena, leaf};
use kernel_info::config::DuplicationPolicy;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::VirtualAddress;
use kernel_mm::{UserSpace, VmError, Vmm};
use kernel_sync::BootCpu;
use kernel_vmem::{AddressSpace, FrameArena, PagePerm};

fn read(vmm: &Vmm<'_, &FrameArena, BootCpu>, space: &UserSpace, va: u64) -> [u8; 5] {
    let mut buf = [0; 5];
    vmm.copy_in(space, &mut buf, VirtualAddress::new(va)).unwrap();
    buf
}

#[test]
fn shared_pages_stay_transparent_across_writes() {
    let ram = arena(32);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);

    let mut parent = vmm.create().unwrap();
    vmm.grow(&mut parent, 2 * PAGE_SIZE).unwrap();
    vmm.copy_out(&mut parent, VirtualAddress::new(0), b"hello").unwrap();
    vmm.copy_out(&mut parent, VirtualAddress::new(PAGE_SIZE), b"world").unwrap();
    assert_eq!(pages.free_count(), 27);

    let mut child = vmm.duplicate(&mut parent).unwrap();
    assert_eq!(child.size(), parent.size());
    // root + two intermediate tables, no data pages
    assert_eq!(pages.free_count(), 24);

    for n in 0..2 {
        let p = leaf(&ram, parent.root(), n);
        let c = leaf(&ram, child.root(), n);
        assert_eq!(p.physical_page(), c.physical_page());
        assert_eq!(pages.ref_count(p.physical_page()), Some(2));
        assert!(!p.writable() && !c.writable());
        assert!(p.copy_on_write() && c.copy_on_write());
        assert!(p.user() && p.readable() && p.executable());
    }
    assert_eq!(&read(&vmm, &child, 0), b"hello");
    assert_eq!(&read(&vmm, &child, PAGE_SIZE), b"world");

    // Child stores into page 0.
    let shared = leaf(&ram, parent.root(), 0).physical_page();
    vmm.handle_write_fault(&mut child, VirtualAddress::new(0x10)).unwrap();
    let private = leaf(&ram, child.root(), 0);
    assert_ne!(private.physical_page(), shared);
    assert!(private.writable() && !private.copy_on_write());
    assert_eq!(pages.ref_count(shared), Some(1));
    assert_eq!(pages.ref_count(private.physical_page()), Some(1));
    assert_eq!(pages.free_count(), 23);

    vmm.copy_out(&mut child, VirtualAddress::new(0), b"HELLO").unwrap();
    assert_eq!(&read(&vmm, &parent, 0), b"hello");
    assert_eq!(&read(&vmm, &child, 0), b"HELLO");

    // A kernel write into the parent's still-shared page 1 breaks the share.
    vmm.copy_out(&mut parent, VirtualAddress::new(PAGE_SIZE), b"WORLD").unwrap();
    assert_eq!(&read(&vmm, &parent, PAGE_SIZE), b"WORLD");
    assert_eq!(&read(&vmm, &child, PAGE_SIZE), b"world");
    assert_eq!(pages.free_count(), 22);

    // The parent is the last owner of page 0 now; no copy is made.
    vmm.handle_write_fault(&mut parent, VirtualAddress::new(0)).unwrap();
    let kept = leaf(&ram, parent.root(), 0);
    assert_eq!(kept.physical_page(), shared);
    assert!(kept.writable() && !kept.copy_on_write());
    assert_eq!(pages.free_count(), 22);

    vmm.destroy(child);
    vmm.destroy(parent);
    assert_eq!(pages.free_count(), 32);
}

#[test]
fn grandchildren_share_one_page() {
    let ram = arena(32);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);

    let mut first = vmm.create().unwrap();
    vmm.load_initial_image(&mut first, b"init").unwrap();
    let mut second = vmm.duplicate(&mut first).unwrap();
    let third = vmm.duplicate(&mut second).unwrap();

    let page = leaf(&ram, first.root(), 0).physical_page();
    assert_eq!(leaf(&ram, third.root(), 0).physical_page(), page);
    assert_eq!(pages.ref_count(page), Some(3));

    vmm.destroy(second);
    assert_eq!(pages.ref_count(page), Some(2));
    vmm.destroy(first);
    assert_eq!(pages.ref_count(page), Some(1));
    vmm.destroy(third);
    assert_eq!(pages.free_count(), 32);
}

#[test]
fn eager_duplicate_copies_every_page() {
    let ram = arena(32);
    let pages = allocator(&ram, DuplicationPolicy::Eager);
    let vmm = Vmm::new(&pages);

    let mut parent = vmm.create().unwrap();
    vmm.grow(&mut parent, 2 * PAGE_SIZE).unwrap();
    vmm.copy_out(&mut parent, VirtualAddress::new(PAGE_SIZE - 2), b"span")
        .unwrap();

    let mut child = vmm.duplicate(&mut parent).unwrap();
    assert_eq!(pages.free_count(), 32 - 5 - 5);
    for n in 0..2 {
        let p = leaf(&ram, parent.root(), n);
        let c = leaf(&ram, child.root(), n);
        assert_ne!(p.physical_page(), c.physical_page());
        assert_eq!(p.perm(), c.perm());
        assert!(c.writable() && !c.copy_on_write());
        assert_eq!(pages.ref_count(c.physical_page()), None);
    }

    let mut buf = [0; 4];
    vmm.copy_in(&child, &mut buf, VirtualAddress::new(PAGE_SIZE - 2))
        .unwrap();
    assert_eq!(&buf, b"span");

    // Nothing is copy-on-write, so a store fault is a real violation.
    assert_eq!(
        vmm.handle_write_fault(&mut child, VirtualAddress::new(0)),
        Err(VmError::NotCopyOnWrite)
    );

    vmm.destroy(child);
    vmm.destroy(parent);
    assert_eq!(pages.free_count(), 32);
}

#[test]
fn failed_eager_duplicate_releases_the_partial_child() {
    // parent: root, two tables, three pages
    let ram = arena(10);
    let pages = allocator(&ram, DuplicationPolicy::Eager);
    let vmm = Vmm::new(&pages);
    let mut parent = vmm.create().unwrap();
    vmm.grow(&mut parent, 3 * PAGE_SIZE).unwrap();
    assert_eq!(pages.free_count(), 4);

    assert_eq!(vmm.duplicate(&mut parent).unwrap_err(), VmError::OutOfMemory);
    assert_eq!(pages.free_count(), 4);

    vmm.destroy(parent);
    assert_eq!(pages.free_count(), 10);
}

#[test]
fn failed_shared_duplicate_leaves_counts_alone() {
    let ram = arena(7);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut parent = vmm.create().unwrap();
    vmm.grow(&mut parent, 2 * PAGE_SIZE).unwrap();
    vmm.copy_out(&mut parent, VirtualAddress::new(0), b"hello").unwrap();
    assert_eq!(pages.free_count(), 2);

    assert_eq!(vmm.duplicate(&mut parent).unwrap_err(), VmError::OutOfMemory);
    assert_eq!(pages.free_count(), 2);
    for n in 0..2 {
        let page = leaf(&ram, parent.root(), n).physical_page();
        assert_eq!(pages.ref_count(page), Some(1));
    }

    // Still usable; the sole owner writes in place.
    vmm.copy_out(&mut parent, VirtualAddress::new(0), b"HELLO").unwrap();
    assert_eq!(&read(&vmm, &parent, 0), b"HELLO");
    assert_eq!(pages.free_count(), 2);

    vmm.destroy(parent);
    assert_eq!(pages.free_count(), 7);
}

#[test]
fn fault_on_a_kernel_only_page_is_rejected() {
    let ram = arena(16);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);
    let mut parent = vmm.create().unwrap();
    vmm.grow(&mut parent, 2 * PAGE_SIZE).unwrap();
    let mut child = vmm.duplicate(&mut parent).unwrap();

    vmm.clear_user_access(&mut child, VirtualAddress::new(0));
    assert!(matches!(
        vmm.handle_write_fault(&mut child, VirtualAddress::new(0)),
        Err(VmError::BadAddress(_))
    ));
    assert!(matches!(
        vmm.handle_write_fault(&mut child, VirtualAddress::new(2 * PAGE_SIZE)),
        Err(VmError::BadAddress(_))
    ));

    let tables = AddressSpace::from_root(&ram, child.root());
    assert!(tables.translate(VirtualAddress::new(PAGE_SIZE)).is_ok());

    vmm.destroy(child);
    vmm.destroy(parent);
    assert_eq!(pages.free_count(), 16);
}

#[test]
fn read_only_pages_are_shared_without_the_cow_marker() {
    let ram = arena(32);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let vmm = Vmm::new(&pages);

    let mut parent = vmm.create().unwrap();
    vmm.grow(&mut parent, 2 * PAGE_SIZE).unwrap();
    let text = VirtualAddress::new(PAGE_SIZE);
    vmm.copy_out(&mut parent, text, b"const").unwrap();
    AddressSpace::from_root(&ram, parent.root())
        .walk(text)
        .unwrap()
        .set_perm(PagePerm::READ | PagePerm::USER);

    let mut child = vmm.duplicate(&mut parent).unwrap();
    let shared = leaf(&ram, parent.root(), 1).physical_page();
    let seen = leaf(&ram, child.root(), 1);
    assert_eq!(seen.physical_page(), shared);
    assert_eq!(pages.ref_count(shared), Some(2));
    assert!(!seen.copy_on_write() && !seen.writable());
    assert!(!leaf(&ram, parent.root(), 1).copy_on_write());

    // Kernel writes and store faults both refuse, in either space.
    assert_eq!(
        vmm.copy_out(&mut child, text, b"CONST"),
        Err(VmError::ReadOnly)
    );
    assert_eq!(
        vmm.copy_out(&mut parent, text, b"CONST"),
        Err(VmError::ReadOnly)
    );
    assert_eq!(
        vmm.handle_write_fault(&mut child, text),
        Err(VmError::NotCopyOnWrite)
    );
    assert_eq!(&read(&vmm, &parent, PAGE_SIZE), b"const");
    assert_eq!(&read(&vmm, &child, PAGE_SIZE), b"const");
    assert_eq!(pages.ref_count(shared), Some(2));

    vmm.destroy(child);
    assert_eq!(pages.ref_count(shared), Some(1));
    vmm.destroy(parent);
    assert_eq!(pages.free_count(), 32);
}
