//! 执行流控制模块

pub use cpu::CpuManager;
pub use cpu::{intr_get, pop_off, push_off};

mod cpu;
