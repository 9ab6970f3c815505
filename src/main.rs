use std::{sync::Arc, thread};

use env_logger::Env;
use log::{error, info};
use vm_kernel::{
    Kernel, LoadPolicy, MemoryImage, Process, Result, VmConfig, PAGE_SIZE,
};

/// Pages each demo process scribbles over, more than fit in memory at once.
const TOUCHED_PAGES: usize = 10;

fn image() -> Arc<MemoryImage> {
    Arc::new(
        MemoryImage::new(PAGE_SIZE)
            .with_section(".text", vec![0x90; 2 * PAGE_SIZE], true)
            .with_section(".data", b"hello from .data".to_vec(), false),
    )
}

fn run(process: &Process<PAGE_SIZE>) -> Result<()> {
    let base = process.address_space().image().num_pages() * PAGE_SIZE;
    for page in 0..TOUCHED_PAGES {
        let pattern = vec![(process.pid() as u8) ^ (page as u8); PAGE_SIZE];
        process.write_virtual(base + page * PAGE_SIZE, &pattern)?;
    }
    for page in 0..TOUCHED_PAGES {
        let mut buf = vec![0; PAGE_SIZE];
        process.read_virtual(base + page * PAGE_SIZE, &mut buf)?;
        let expected = (process.pid() as u8) ^ (page as u8);
        if buf.iter().any(|&b| b != expected) {
            error!("Process {} page {} came back corrupted", process.pid(), page);
        }
    }
    let greeting = process.read_string(2 * PAGE_SIZE, 64)?;
    info!("Process {} reads {:?}", process.pid(), greeting);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = VmConfig::from_env()?.with_stack_pages(TOUCHED_PAGES);
    let kernel = Arc::new(Kernel::boot(config)?);
    println!("---- Kernel booted ----");

    let mut workers = Vec::new();
    for pid in 1..=3 {
        let process = Process::load(&kernel, pid, image(), &["demo"], LoadPolicy::DemandPaged)?;
        workers.push(thread::spawn(move || {
            let status = match run(&process) {
                Ok(()) => 0,
                Err(err) => {
                    error!("Process {} failed: {}", process.pid(), err);
                    err.exit_status()
                }
            };
            process.exit(status)
        }));
    }
    for worker in workers {
        if let Ok(Some(teardown)) = worker.join() {
            println!("Released {:?}", teardown);
        }
    }

    println!("{:#?}", kernel.stats());
    println!("---- Kernel halted ----");
    Ok(())
}
