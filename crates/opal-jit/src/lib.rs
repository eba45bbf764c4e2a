//! JIT façade.
//!
//! Owns the function table, the object heap and the compile cache, and
//! hands compiled code the callback table it needs to allocate objects,
//! resolve globals and report runtime errors. Global resolution re-enters
//! the façade through an `extern "win64"` trampoline whose context pointer
//! is baked into the generated code, so a [`Jit`] keeps its state behind a
//! stable heap allocation and is not `Send`.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use log::debug;
use opal_ir::{dump_function, Function, Name};
use opal_runtime::{ExecBuffer, HostCallbacks, ObjectHeap, PublishError, Value};
use opal_target_x64::{compile_function, CompileError};

pub use opal_ir::{name, Name as FunctionName};
pub use opal_lang::ParseError;
pub use opal_runtime::Value as JitValue;

/// Errors surfaced by the façade.
#[derive(Debug)]
pub enum JitError {
    Parse(ParseError),
    Compile(CompileError),
    Publish(PublishError),
    UnknownFunction(Name),
    TooManyArguments(usize),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitError::Parse(err) => write!(f, "parse error: {err}"),
            JitError::Compile(err) => write!(f, "compile error: {err}"),
            JitError::Publish(err) => write!(f, "{err}"),
            JitError::UnknownFunction(name) => write!(f, "unknown function '{name}'"),
            JitError::TooManyArguments(n) => {
                write!(f, "cannot invoke with {n} arguments; at most 4 are supported")
            }
        }
    }
}

impl std::error::Error for JitError {}

impl From<ParseError> for JitError {
    fn from(err: ParseError) -> Self {
        JitError::Parse(err)
    }
}

impl From<CompileError> for JitError {
    fn from(err: CompileError) -> Self {
        JitError::Compile(err)
    }
}

impl From<PublishError> for JitError {
    fn from(err: PublishError) -> Self {
        JitError::Publish(err)
    }
}

struct FunctionRecord {
    func: Function,
    compiled: Option<Compiled>,
}

struct Compiled {
    code: Vec<u8>,
    exec: ExecBuffer,
}

struct JitState {
    functions: BTreeMap<Name, FunctionRecord>,
    heap: ObjectHeap,
}

/// The JIT: parse sources in, get callable machine code out.
pub struct Jit {
    state: *mut JitState,
}

impl Jit {
    pub fn new() -> Jit {
        let state = Box::new(JitState {
            functions: BTreeMap::new(),
            heap: ObjectHeap::new(),
        });
        Jit {
            state: Box::into_raw(state),
        }
    }

    fn state(&self) -> &JitState {
        unsafe { &*self.state }
    }

    fn state_mut(&mut self) -> &mut JitState {
        unsafe { &mut *self.state }
    }

    /// Parse a source file and register every function it defines.
    pub fn add_source(&mut self, source: &str) -> Result<(), JitError> {
        for func in opal_lang::parse_source(source)? {
            self.add_function(func);
        }
        Ok(())
    }

    /// Register an already-built IR function.
    pub fn add_function(&mut self, func: Function) {
        let name = func.name;
        self.state_mut().functions.insert(
            name,
            FunctionRecord {
                func,
                compiled: None,
            },
        );
    }

    pub fn has_function(&self, name: Name) -> bool {
        self.state().functions.contains_key(&name)
    }

    fn callbacks(&self) -> HostCallbacks {
        callbacks_for(self.state)
    }

    /// Entry pointer of `name`, compiling and publishing on first demand.
    pub fn get_compiled_function(&mut self, name: Name) -> Result<*const u8, JitError> {
        let callbacks = self.callbacks();
        let record = self
            .state_mut()
            .functions
            .get_mut(&name)
            .ok_or(JitError::UnknownFunction(name))?;
        if record.compiled.is_none() {
            let compiled = compile_function(&mut record.func, callbacks)?;
            let exec = ExecBuffer::publish(&compiled.code)?;
            debug!("published '{}' at {:p}", name, exec.as_ptr());
            record.compiled = Some(Compiled {
                code: compiled.code,
                exec,
            });
        }
        Ok(record
            .compiled
            .as_ref()
            .expect("just compiled")
            .exec
            .as_ptr())
    }

    /// The compiled bytes of `name` as lowercase hex.
    pub fn dump_function(&mut self, name: Name) -> Result<String, JitError> {
        self.get_compiled_function(name)?;
        let record = &self.state().functions[&name];
        let code = &record.compiled.as_ref().expect("just compiled").code;
        let mut out = String::with_capacity(code.len() * 2);
        for byte in code {
            let _ = write!(out, "{byte:02x}");
        }
        Ok(out)
    }

    /// The textual IR of `name`.
    pub fn dump_ir(&self, name: Name) -> Result<String, JitError> {
        let record = self
            .state()
            .functions
            .get(&name)
            .ok_or(JitError::UnknownFunction(name))?;
        Ok(dump_function(&record.func))
    }

    /// Invoke `name` with integer arguments.
    #[cfg(target_arch = "x86_64")]
    pub fn invoke(&mut self, name: Name, args: &[i32]) -> Result<Value, JitError> {
        let boxed: Vec<Value> = args.iter().map(|&a| Value::from_i32(a)).collect();
        self.invoke_raw(name, &boxed)
    }

    /// Invoke `name` with pre-boxed values.
    #[cfg(target_arch = "x86_64")]
    pub fn invoke_raw(&mut self, name: Name, args: &[Value]) -> Result<Value, JitError> {
        let entry = self.get_compiled_function(name)?;
        let raw: Vec<u64> = args.iter().map(|v| v.raw()).collect();
        let result = unsafe {
            use std::mem::transmute;
            match raw.len() {
                0 => transmute::<*const u8, extern "win64" fn() -> u64>(entry)(),
                1 => transmute::<*const u8, extern "win64" fn(u64) -> u64>(entry)(raw[0]),
                2 => transmute::<*const u8, extern "win64" fn(u64, u64) -> u64>(entry)(
                    raw[0], raw[1],
                ),
                3 => transmute::<*const u8, extern "win64" fn(u64, u64, u64) -> u64>(entry)(
                    raw[0], raw[1], raw[2],
                ),
                4 => transmute::<*const u8, extern "win64" fn(u64, u64, u64, u64) -> u64>(
                    entry,
                )(raw[0], raw[1], raw[2], raw[3]),
                n => return Err(JitError::TooManyArguments(n)),
            }
        };
        Ok(Value::from_raw(result))
    }
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Jit {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.state) });
    }
}

impl fmt::Debug for Jit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jit")
            .field("functions", &self.state().functions.len())
            .finish()
    }
}

fn callbacks_for(state: *mut JitState) -> HostCallbacks {
    HostCallbacks {
        ctx: state as u64,
        resolve: resolve_addr(),
        heap: unsafe { &mut (*state).heap as *mut ObjectHeap as u64 },
        object_new: object_new_addr(),
        attr_ptr: attr_ptr_addr(),
        error: error_addr(),
    }
}

/// Resolve a `Global` reference from generated code: compile the named
/// function on demand and return its entry pointer. A failure here has no
/// caller to unwind to, so it aborts.
#[cfg(target_arch = "x86_64")]
extern "win64" fn resolve_global(ctx: u64, name_ptr: u64) -> u64 {
    let state = ctx as *mut JitState;
    let interned: &String = unsafe { &*(name_ptr as *const String) };
    let name = Name::from_ref(interned.as_str());

    let callbacks = callbacks_for(state);
    let record = match unsafe { (*state).functions.get_mut(&name) } {
        Some(record) => record,
        None => {
            log::error!("unresolved global '{name}'");
            std::process::abort();
        }
    };
    if record.compiled.is_none() {
        let compiled = match compile_function(&mut record.func, callbacks) {
            Ok(compiled) => compiled,
            Err(err) => {
                log::error!("failed to compile '{name}': {err}");
                std::process::abort();
            }
        };
        let exec = match ExecBuffer::publish(&compiled.code) {
            Ok(exec) => exec,
            Err(err) => {
                log::error!("failed to publish '{name}': {err}");
                std::process::abort();
            }
        };
        record.compiled = Some(Compiled {
            code: compiled.code,
            exec,
        });
    }
    record.compiled.as_ref().expect("just compiled").exec.as_ptr() as u64
}

#[cfg(target_arch = "x86_64")]
fn resolve_addr() -> u64 {
    resolve_global as usize as u64
}

#[cfg(target_arch = "x86_64")]
fn object_new_addr() -> u64 {
    opal_runtime::rt_object_new as usize as u64
}

#[cfg(target_arch = "x86_64")]
fn attr_ptr_addr() -> u64 {
    opal_runtime::rt_attr_ptr as usize as u64
}

#[cfg(target_arch = "x86_64")]
fn error_addr() -> u64 {
    opal_runtime::rt_error as usize as u64
}

#[cfg(not(target_arch = "x86_64"))]
fn resolve_addr() -> u64 {
    0
}

#[cfg(not(target_arch = "x86_64"))]
fn object_new_addr() -> u64 {
    0
}

#[cfg(not(target_arch = "x86_64"))]
fn attr_ptr_addr() -> u64 {
    0
}

#[cfg(not(target_arch = "x86_64"))]
fn error_addr() -> u64 {
    0
}
