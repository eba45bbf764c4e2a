//! Test utilities: a reference interpreter for the integer subset of the
//! IR and helpers that compare it against the compiled code.

mod interp;

pub use interp::{interpret, InterpError};

use opal_ir::name;

/// Interpret `func_name` from `source` under the reference semantics.
pub fn run_interp(source: &str, func_name: &str, args: &[i32]) -> i32 {
    let funcs = opal_lang::parse_source(source).expect("source must parse");
    let func = funcs
        .into_iter()
        .find(|f| f.name == name(func_name))
        .expect("function must exist");
    interpret(&func, args).expect("interpretation must succeed")
}

/// Compile `func_name` from `source` and run it on the machine.
#[cfg(target_arch = "x86_64")]
pub fn run_jit(source: &str, func_name: &str, args: &[i32]) -> opal_jit::JitValue {
    let mut jit = opal_jit::Jit::new();
    jit.add_source(source).expect("source must parse");
    jit.invoke(name(func_name), args).expect("invocation must succeed")
}

/// The machine and the reference interpreter must agree.
#[cfg(target_arch = "x86_64")]
pub fn assert_equivalent(source: &str, func_name: &str, args: &[i32]) {
    let expected = run_interp(source, func_name, args);
    let actual = run_jit(source, func_name, args);
    assert!(
        actual.is_int(),
        "{func_name}({args:?}) compiled to a non-integer: {:#x}",
        actual.raw()
    );
    assert_eq!(
        actual.as_i32(),
        expected,
        "{func_name}({args:?}): machine {} != interpreter {}",
        actual.as_i32(),
        expected
    );
}
