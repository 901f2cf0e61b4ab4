use kernel_sync::CurrentCpu;
use std::cell::Cell;

thread_local! {
    static CPU: Cell<usize> = const { Cell::new(0) };
}

/// CPU identity taken from a per-thread slot, so test threads act as harts.
#[derive(Debug, Default, Copy, Clone)]
pub struct ThreadCpu;

impl ThreadCpu {
    pub fn become_cpu(id: usize) {
        CPU.with(|c| c.set(id));
    }
}

impl CurrentCpu for ThreadCpu {
    fn cpu_id(&self) -> usize {
        CPU.with(Cell::get)
    }
}
