mod common;

use std::{path::Path, sync::Arc};

use common::*;
use serial_test::serial;
use vm_kernel::{
    config::DEFAULT_SWAP_FILE, error::FAULT_EXIT_STATUS, Kernel, LoadPolicy, MemoryImage, Process,
    VmConfig, VmError,
};

fn program() -> Arc<MemoryImage> {
    Arc::new(
        MemoryImage::new(PAGE)
            .with_section(".text", vec![0x90; PAGE + 8], true)
            .with_section(".data", b"greetings\0".to_vec(), false),
    )
}

#[test]
fn arguments_are_laid_out_in_the_top_page() {
    let h = boot(VmConfig::default().with_frames(4).with_stack_pages(2));
    let process = Process::load(&h.mm, 1, program(), &["prog", "-v"], LoadPolicy::DemandPaged).unwrap();

    // Three image pages, two stack pages, one argument page.
    assert_eq!(process.address_space().num_pages(), 6);
    assert_eq!(process.argc(), 2);
    assert_eq!(process.argv(), 5 * PAGE);
    assert_eq!(process.initial_sp(), process.argv());

    let mut pointers = [0u8; 12];
    process.read_virtual(process.argv(), &mut pointers).unwrap();
    let args: Vec<_> = pointers
        .chunks(4)
        .map(|p| u32::from_le_bytes([p[0], p[1], p[2], p[3]]) as usize)
        .collect();
    assert_eq!(args[2], 0);
    assert_eq!(process.read_string(args[0], 16).unwrap().as_deref(), Some("prog"));
    assert_eq!(process.read_string(args[1], 16).unwrap().as_deref(), Some("-v"));
}

#[test]
fn data_section_is_readable_as_a_string() {
    let h = boot_frames(4);
    let process = Process::load(&h.mm, 1, program(), &[], LoadPolicy::DemandPaged).unwrap();
    assert_eq!(
        process.read_string(2 * PAGE, 32).unwrap().as_deref(),
        Some("greetings")
    );
    // No terminator within the limit.
    assert_eq!(process.read_string(2 * PAGE, 4).unwrap(), None);
}

#[test]
fn fragmented_executable_is_rejected() {
    let h = boot_frames(4);
    let image = Arc::new(
        MemoryImage::new(PAGE)
            .with_section(".text", vec![1; PAGE], true)
            .with_section_at(".data", 3, vec![2; PAGE], false),
    );
    assert!(matches!(
        Process::load(&h.mm, 1, image, &[], LoadPolicy::DemandPaged),
        Err(VmError::FragmentedExecutable { section: 1 })
    ));
    assert!(h.mm.address_space(1).is_err());
}

#[test]
fn oversized_arguments_are_rejected() {
    let h = boot_frames(4);
    let huge = "x".repeat(PAGE);
    assert!(matches!(
        Process::load(&h.mm, 1, program(), &[huge.as_str()], LoadPolicy::DemandPaged),
        Err(VmError::ArgumentsTooLarge { .. })
    ));
    assert!(h.mm.address_space(1).is_err());
}

#[test]
fn exit_returns_everything_once() {
    let h = boot(VmConfig::default().with_frames(2).with_stack_pages(2));
    let process = Process::load(&h.mm, 1, program(), &["a"], LoadPolicy::DemandPaged).unwrap();
    process.write_virtual(3 * PAGE, &page_of(1)).unwrap();
    process.write_virtual(4 * PAGE, &page_of(2)).unwrap();
    let space = Arc::clone(process.address_space());
    let resident = space.resident_pages();

    let teardown = process.exit(0).unwrap();
    assert_eq!(teardown.frames_freed, resident);
    assert_eq!(teardown.slots_freed, 1);
    assert_eq!(process.exit_status(), Some(0));
    assert!(process.exit(3).is_none());
    assert_eq!(process.exit_status(), Some(0));
    assert!(h.mm.frame_snapshot().iter().all(|f| f.is_free()));
}

#[test]
fn unresolvable_fault_kills_the_process() {
    let h = boot(VmConfig::default().with_frames(2).with_stack_pages(1));
    let process = Process::load(&h.mm, 1, program(), &[], LoadPolicy::DemandPaged).unwrap();
    let limit = process.address_space().limit();

    assert!(process.handle_page_fault(limit - 1));
    assert_eq!(process.exit_status(), None);

    assert!(!process.handle_page_fault(limit));
    assert_eq!(process.exit_status(), Some(FAULT_EXIT_STATUS));
    assert!(matches!(h.mm.address_space(1), Err(VmError::UnknownProcess(1))));
}

#[test]
fn swap_exhaustion_kills_the_process() {
    let h = boot(
        VmConfig::default()
            .with_frames(1)
            .with_stack_pages(1)
            .with_swap_slots(0),
    );
    let process = Process::load(&h.mm, 1, Arc::new(MemoryImage::new(PAGE)), &[], LoadPolicy::DemandPaged)
        .unwrap();
    // The argument page is dirty and the only frame; it has nowhere to go.
    assert!(!process.handle_page_fault(0));
    assert_eq!(process.exit_status(), Some(-1));
    assert!(h.mm.frame_snapshot().iter().all(|f| f.is_free()));
}

#[test]
fn eager_process_has_its_image_resident() {
    let h = boot(VmConfig::default().with_frames(8).with_stack_pages(2));
    let process = Process::load(&h.mm, 1, program(), &[], LoadPolicy::Eager).unwrap();
    let space = process.address_space();
    for vpn in 0..3 {
        assert!(space.translation(vpn).unwrap().valid, "image page {} not resident", vpn);
    }
    // Plus the argument page written during load.
    assert_eq!(space.resident_pages(), 4);
}

#[test]
#[serial]
fn swap_file_is_removed_on_shutdown() {
    init_logging();
    let kernel = Kernel::boot(VmConfig::default().with_frames(2)).unwrap();
    assert!(Path::new(DEFAULT_SWAP_FILE).exists());
    drop(kernel);
    assert!(!Path::new(DEFAULT_SWAP_FILE).exists());
}

#[test]
#[serial]
fn kept_swap_file_survives_shutdown() {
    init_logging();
    let kernel = Kernel::boot(VmConfig::default().with_frames(2).keep_swap_file()).unwrap();
    drop(kernel);
    assert!(Path::new(DEFAULT_SWAP_FILE).exists());
    std::fs::remove_file(DEFAULT_SWAP_FILE).unwrap();
}
