//! The hooks Sanitizer Coverage instrumentation calls into, and the
//! process-wide [`TracePc`] singleton they feed.
//!
//! For more information about Sanitizer Coverage, see
//! <https://clang.llvm.org/docs/SanitizerCoverage.html>.
//!
//! The instrumentation ABI has no user-data slot, so the sensor must be a
//! process-wide owned object reached through a global; everything else
//! (bucketing, emission order, scoring) lives in plain, directly testable
//! methods on [`TracePc`] that never touch this global.
//!
//! ```text
//! // Called before a comparison instruction.
//! void __sanitizer_cov_trace_cmp1(uint8_t Arg1, uint8_t Arg2);
//! void __sanitizer_cov_trace_cmp2(uint16_t Arg1, uint16_t Arg2);
//! void __sanitizer_cov_trace_cmp4(uint32_t Arg1, uint32_t Arg2);
//! void __sanitizer_cov_trace_cmp8(uint64_t Arg1, uint64_t Arg2);
//! ```

use super::TracePc;
use crate::config::Config;
use std::mem::MaybeUninit;
use std::sync::Once;

static mut SHARED_SENSOR: MaybeUninit<TracePc> = MaybeUninit::uninit();
static INIT: Once = Once::new();

/// Returns a reference to the only [`TracePc`] in the process, constructing
/// it with the default [`Config`] on first access. The instrumentation
/// trampolines below are the only other code that touches this global.
pub fn shared_sensor() -> &'static mut TracePc {
    INIT.call_once(|| unsafe {
        SHARED_SENSOR.as_mut_ptr().write(TracePc::new(&Config::default()));
    });
    unsafe { &mut *SHARED_SENSOR.as_mut_ptr() }
}

extern "C" {
    #[link_name = "llvm.returnaddress"]
    fn llvm_return_address(level: i32) -> *const u8;
}

/// The program counter of the instruction that called into the current
/// hook — used to identify *where* a comparison happened, since the
/// comparison hooks themselves receive only the compared values.
#[inline]
unsafe fn return_address() -> usize {
    unsafe { llvm_return_address(0) as usize }
}

#[no_mangle]
pub unsafe extern "C" fn __sanitizer_cov_trace_pc_guard_init(start: *mut u32, stop: *mut u32) {
    unsafe { shared_sensor().handle_pc_guard_init(start, stop) };
}

#[no_mangle]
pub unsafe extern "C" fn __sanitizer_cov_trace_pc_guard(guard: *mut u32) {
    let guard_id = unsafe { *guard } as usize;
    shared_sensor().bump_guard(guard_id);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_pc_indir(callee: usize) {
    let caller = unsafe { return_address() };
    shared_sensor().handle_pc_indir(caller, callee);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_cmp1(arg1: u8, arg2: u8) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u8(pc, arg1, arg2);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_cmp2(arg1: u16, arg2: u16) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u16(pc, arg1, arg2);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_cmp4(arg1: u32, arg2: u32) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u32(pc, arg1, arg2);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_cmp8(arg1: u64, arg2: u64) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u64(pc, arg1, arg2);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_const_cmp1(arg1: u8, arg2: u8) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u8(pc, arg1, arg2);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_const_cmp2(arg1: u16, arg2: u16) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u16(pc, arg1, arg2);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_const_cmp4(arg1: u32, arg2: u32) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u32(pc, arg1, arg2);
}

#[no_mangle]
pub extern "C" fn __sanitizer_cov_trace_const_cmp8(arg1: u64, arg2: u64) {
    let pc = unsafe { return_address() };
    shared_sensor().handle_trace_cmp_u64(pc, arg1, arg2);
}
