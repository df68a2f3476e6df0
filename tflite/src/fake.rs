//! In-process engine implementing the full [`EngineApi`] table.
//!
//! This is a test double for the out-of-scope native engine, not an
//! inference runtime: a "model" is a JSON tensor-signature descriptor
//! ([`ModelDesc`]), `invoke` writes a deterministic finite function of the
//! input bytes, and the delegate partition is recorded so tests can observe
//! claim ordering. It exists so the binding's ownership and lifecycle
//! machinery can be exercised end to end without the native library.
//!
//! Conventions:
//! - operators prefixed `flex_` are only claimable by the flex delegate;
//!   without one, `allocate_tensors` fails and the error reporter fires.
//! - operators prefixed `cpu_` are refused by the accelerator delegate.
//! - an op list containing `reject_graph` makes interpreter construction
//!   fail, standing in for a delegate rejecting the partition.
//! - exactly one accelerator device (index 0) is visible.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ffi::{self, EngineApi, RawQuantizationParams, ReporterFn};

/// Installs the fake engine table. Safe to call repeatedly.
pub fn install() -> Result<(), Error> {
    ffi::install(&FAKE_ENGINE)
}

/// The `(operator, delegate kind)` assignment recorded by the last
/// successful `allocate_tensors`; kind -1 means built-in kernels.
/// Test introspection only; `interp` must run on the fake engine.
pub fn recorded_partition(interp: &crate::Interpreter) -> Vec<(String, i32)> {
    let raw = interp.raw_handle() as *mut FakeInterpreter;
    unsafe { (*raw).partition.clone() }
}

/// The engine thread count snapshotted at construction.
/// Test introspection only.
pub fn recorded_thread_count(interp: &crate::Interpreter) -> i32 {
    let raw = interp.raw_handle() as *mut FakeInterpreter;
    unsafe { (*raw).num_threads }
}

// ---------------------------------------------------------------------------
// Model descriptors
// ---------------------------------------------------------------------------

/// Tensor signature of a fake model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorDesc {
    #[serde(default)]
    pub name: String,
    pub shape: Vec<i32>,
    pub dtype: String,
    #[serde(default)]
    pub scale: f64,
    #[serde(default)]
    pub zero_point: i64,
}

/// The fake engine's "model format": tensor signatures plus an operator
/// list for partitioning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDesc {
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    #[serde(default)]
    pub ops: Vec<String>,
}

fn dtype_to_raw(dtype: &str) -> Option<(c_int, usize)> {
    Some(match dtype {
        "float32" => (1, 4),
        "int32" => (2, 4),
        "uint8" => (3, 1),
        "int64" => (4, 8),
        "bool" => (6, 1),
        "int16" => (7, 2),
        "int8" => (9, 1),
        "float16" => (10, 2),
        _ => return None,
    })
}

fn parse_model(data: &[u8]) -> Option<ModelDesc> {
    let desc: ModelDesc = serde_json::from_slice(data).ok()?;
    if desc.inputs.is_empty() || desc.outputs.is_empty() {
        return None;
    }
    for t in desc.inputs.iter().chain(desc.outputs.iter()) {
        if t.shape.is_empty() || t.shape.iter().any(|&d| d <= 0) {
            return None;
        }
        dtype_to_raw(&t.dtype)?;
    }
    Some(desc)
}

// ---------------------------------------------------------------------------
// Fake objects behind the opaque handles
// ---------------------------------------------------------------------------

struct FakeModel {
    desc: ModelDesc,
}

struct FakeDelegate {
    kind: i32,
    device: i32,
}

struct FakeOptions {
    num_threads: i32,
    delegates: Vec<(i32, i32)>,
    reporter: Option<(ReporterFn, *mut c_void)>,
}

struct FakeTensor {
    name: CString,
    shape: Vec<i32>,
    raw_type: c_int,
    quant: RawQuantizationParams,
    byte_size: usize,
    // u64-backed so every element type's alignment is satisfied.
    buf: Vec<u64>,
}

struct FakeInterpreter {
    desc: ModelDesc,
    num_threads: i32,
    delegates: Vec<(i32, i32)>,
    reporter: Option<(ReporterFn, *mut c_void)>,
    inputs: Vec<*mut FakeTensor>,
    outputs: Vec<*mut FakeTensor>,
    partition: Vec<(String, i32)>,
    allocated: bool,
}

impl FakeInterpreter {
    fn free_tensors(&mut self) {
        for &t in self.inputs.iter().chain(self.outputs.iter()) {
            drop(unsafe { Box::from_raw(t) });
        }
        self.inputs.clear();
        self.outputs.clear();
        self.allocated = false;
    }

    fn report(&self, msg: &str) {
        if let Some((reporter, user_data)) = self.reporter {
            let msg = CString::new(msg).unwrap_or_default();
            unsafe { reporter(user_data, msg.as_ptr()) };
        }
    }
}

impl Drop for FakeInterpreter {
    fn drop(&mut self) {
        self.free_tensors();
    }
}

fn build_tensor(desc: &TensorDesc) -> *mut FakeTensor {
    let (raw_type, width) = dtype_to_raw(&desc.dtype).unwrap_or((1, 4));
    let elements: usize = desc.shape.iter().map(|&d| d as usize).product();
    let byte_size = elements * width;
    Box::into_raw(Box::new(FakeTensor {
        name: CString::new(desc.name.as_str()).unwrap_or_default(),
        shape: desc.shape.clone(),
        raw_type,
        quant: RawQuantizationParams {
            scale: desc.scale as f32,
            zero_point: desc.zero_point as i32,
        },
        byte_size,
        buf: vec![0u64; byte_size.div_ceil(8)],
    }))
}

// ---------------------------------------------------------------------------
// Delegate capabilities and partitioning
// ---------------------------------------------------------------------------

const DEVICE_COUNT: c_int = 1;

fn claims(kind: i32, op: &str) -> bool {
    match kind {
        // Built-in kernels and the CPU fallback cover everything that is
        // not a flex op.
        -1 | 0 => !op.starts_with("flex_"),
        1 => !op.starts_with("flex_") && !op.starts_with("cpu_"),
        2 => op.starts_with("flex_"),
        _ => false,
    }
}

fn partition_ops(
    ops: &[String],
    delegates: &[(i32, i32)],
) -> Result<Vec<(String, i32)>, String> {
    ops.iter()
        .map(|op| {
            for &(kind, _) in delegates {
                if claims(kind, op) {
                    return Ok((op.clone(), kind));
                }
            }
            if claims(-1, op) {
                Ok((op.clone(), -1))
            } else {
                Err(format!("no kernel for operator `{op}`"))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Deterministic invoke
// ---------------------------------------------------------------------------

fn mix(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x
}

fn input_seed(inputs: &[*mut FakeTensor]) -> u64 {
    let mut seed = 0u64;
    for &t in inputs {
        let t = unsafe { &*t };
        let bytes =
            unsafe { std::slice::from_raw_parts(t.buf.as_ptr() as *const u8, t.byte_size) };
        for &b in bytes {
            seed = mix(seed ^ b as u64);
        }
    }
    seed
}

fn fill_output(t: &mut FakeTensor, seed: u64, output_index: usize) {
    let base = t.buf.as_mut_ptr() as *mut u8;
    let elements = t.byte_size
        / dtype_to_raw_width(t.raw_type);
    for j in 0..elements {
        let v = mix(seed ^ ((output_index as u64) << 32) ^ j as u64);
        unsafe {
            match t.raw_type {
                1 => *(base as *mut f32).add(j) = (v % 1024) as f32 / 1024.0,
                2 => *(base as *mut i32).add(j) = (v % 1000) as i32,
                3 => *base.add(j) = (v % 256) as u8,
                4 => *(base as *mut i64).add(j) = (v % 1000) as i64,
                6 => *base.add(j) = (v & 1) as u8,
                7 => *(base as *mut i16).add(j) = (v % 500) as i16,
                9 => *(base as *mut i8).add(j) = (v % 256) as u8 as i8,
                // Finite positive half-precision bit patterns below 1.0.
                10 => *(base as *mut u16).add(j) = (v % 0x3c00) as u16,
                _ => {}
            }
        }
    }
}

fn dtype_to_raw_width(raw_type: c_int) -> usize {
    match raw_type {
        1 | 2 => 4,
        4 => 8,
        7 | 10 => 2,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// EngineApi entry points
// ---------------------------------------------------------------------------

unsafe extern "C" fn model_create_from_file(path: *const c_char) -> *mut c_void {
    let path = unsafe { CStr::from_ptr(path) }.to_string_lossy().into_owned();
    let Ok(data) = std::fs::read(&path) else {
        return ptr::null_mut();
    };
    match parse_model(&data) {
        Some(desc) => Box::into_raw(Box::new(FakeModel { desc })) as *mut c_void,
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn model_create_from_buffer(data: *const c_void, len: usize) -> *mut c_void {
    let data = unsafe { std::slice::from_raw_parts(data as *const u8, len) };
    match parse_model(data) {
        Some(desc) => Box::into_raw(Box::new(FakeModel { desc })) as *mut c_void,
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn model_delete(model: *mut c_void) {
    if !model.is_null() {
        drop(unsafe { Box::from_raw(model as *mut FakeModel) });
    }
}

unsafe extern "C" fn options_create() -> *mut c_void {
    Box::into_raw(Box::new(FakeOptions {
        num_threads: 1,
        delegates: Vec::new(),
        reporter: None,
    })) as *mut c_void
}

unsafe extern "C" fn options_set_num_threads(opts: *mut c_void, n: c_int) {
    unsafe { (*(opts as *mut FakeOptions)).num_threads = n };
}

unsafe extern "C" fn options_add_delegate(opts: *mut c_void, delegate: *mut c_void) {
    unsafe {
        let d = &*(delegate as *mut FakeDelegate);
        (*(opts as *mut FakeOptions)).delegates.push((d.kind, d.device));
    }
}

unsafe extern "C" fn options_set_error_reporter(
    opts: *mut c_void,
    reporter: ReporterFn,
    user_data: *mut c_void,
) {
    unsafe { (*(opts as *mut FakeOptions)).reporter = Some((reporter, user_data)) };
}

unsafe extern "C" fn options_delete(opts: *mut c_void) {
    if !opts.is_null() {
        drop(unsafe { Box::from_raw(opts as *mut FakeOptions) });
    }
}

unsafe extern "C" fn interpreter_create(model: *mut c_void, opts: *mut c_void) -> *mut c_void {
    if model.is_null() {
        return ptr::null_mut();
    }
    let desc = unsafe { (*(model as *mut FakeModel)).desc.clone() };
    if desc.ops.iter().any(|op| op == "reject_graph") {
        return ptr::null_mut();
    }
    let (num_threads, delegates, reporter) = if opts.is_null() {
        (1, Vec::new(), None)
    } else {
        let o = unsafe { &*(opts as *mut FakeOptions) };
        (o.num_threads, o.delegates.clone(), o.reporter)
    };
    Box::into_raw(Box::new(FakeInterpreter {
        desc,
        num_threads,
        delegates,
        reporter,
        inputs: Vec::new(),
        outputs: Vec::new(),
        partition: Vec::new(),
        allocated: false,
    })) as *mut c_void
}

unsafe extern "C" fn interpreter_delete(interp: *mut c_void) {
    if !interp.is_null() {
        drop(unsafe { Box::from_raw(interp as *mut FakeInterpreter) });
    }
}

unsafe extern "C" fn interpreter_allocate_tensors(interp: *mut c_void) -> c_int {
    let it = unsafe { &mut *(interp as *mut FakeInterpreter) };
    match partition_ops(&it.desc.ops, &it.delegates) {
        Ok(partition) => it.partition = partition,
        Err(msg) => {
            it.report(&msg);
            return ffi::STATUS_DELEGATE_ERROR;
        }
    }
    it.free_tensors();
    it.inputs = it.desc.inputs.iter().map(build_tensor).collect();
    it.outputs = it.desc.outputs.iter().map(build_tensor).collect();
    it.allocated = true;
    ffi::STATUS_OK
}

unsafe extern "C" fn interpreter_invoke(interp: *mut c_void) -> c_int {
    let it = unsafe { &mut *(interp as *mut FakeInterpreter) };
    if !it.allocated {
        it.report("invoke on unallocated interpreter");
        return ffi::STATUS_ERROR;
    }
    let seed = input_seed(&it.inputs);
    for (i, &t) in it.outputs.iter().enumerate() {
        fill_output(unsafe { &mut *t }, seed, i);
    }
    ffi::STATUS_OK
}

unsafe extern "C" fn interpreter_resize_input(
    interp: *mut c_void,
    index: c_int,
    dims: *const c_int,
    ndims: c_int,
) -> c_int {
    let it = unsafe { &mut *(interp as *mut FakeInterpreter) };
    let index = index as usize;
    if index >= it.desc.inputs.len() || ndims <= 0 {
        return ffi::STATUS_ERROR;
    }
    let dims = unsafe { std::slice::from_raw_parts(dims, ndims as usize) };
    if dims.iter().any(|&d| d <= 0) {
        return ffi::STATUS_ERROR;
    }
    it.desc.inputs[index].shape = dims.to_vec();
    it.allocated = false;
    ffi::STATUS_OK
}

unsafe extern "C" fn interpreter_input_count(interp: *mut c_void) -> c_int {
    unsafe { (*(interp as *mut FakeInterpreter)).desc.inputs.len() as c_int }
}

unsafe extern "C" fn interpreter_output_count(interp: *mut c_void) -> c_int {
    unsafe { (*(interp as *mut FakeInterpreter)).desc.outputs.len() as c_int }
}

unsafe extern "C" fn interpreter_input_tensor(interp: *mut c_void, index: c_int) -> *mut c_void {
    let it = unsafe { &*(interp as *mut FakeInterpreter) };
    if !it.allocated {
        return ptr::null_mut();
    }
    match it.inputs.get(index as usize) {
        Some(&t) => t as *mut c_void,
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn interpreter_output_tensor(
    interp: *mut c_void,
    index: c_int,
) -> *const c_void {
    let it = unsafe { &*(interp as *mut FakeInterpreter) };
    if !it.allocated {
        return ptr::null();
    }
    match it.outputs.get(index as usize) {
        Some(&t) => t as *const c_void,
        None => ptr::null(),
    }
}

unsafe extern "C" fn tensor_type(tensor: *const c_void) -> c_int {
    unsafe { (*(tensor as *const FakeTensor)).raw_type }
}

unsafe extern "C" fn tensor_num_dims(tensor: *const c_void) -> c_int {
    unsafe { (*(tensor as *const FakeTensor)).shape.len() as c_int }
}

unsafe extern "C" fn tensor_dim(tensor: *const c_void, index: c_int) -> c_int {
    let t = unsafe { &*(tensor as *const FakeTensor) };
    t.shape.get(index as usize).copied().unwrap_or(0)
}

unsafe extern "C" fn tensor_byte_size(tensor: *const c_void) -> usize {
    unsafe { (*(tensor as *const FakeTensor)).byte_size }
}

unsafe extern "C" fn tensor_data(tensor: *const c_void) -> *mut c_void {
    unsafe { (*(tensor as *mut FakeTensor)).buf.as_ptr() as *mut c_void }
}

unsafe extern "C" fn tensor_name(tensor: *const c_void) -> *const c_char {
    unsafe { (*(tensor as *const FakeTensor)).name.as_ptr() }
}

unsafe extern "C" fn tensor_quantization(tensor: *const c_void) -> RawQuantizationParams {
    unsafe { (*(tensor as *const FakeTensor)).quant }
}

unsafe extern "C" fn delegate_create_cpu_fallback(_num_threads: c_int) -> *mut c_void {
    Box::into_raw(Box::new(FakeDelegate { kind: 0, device: -1 })) as *mut c_void
}

unsafe extern "C" fn delegate_create_accelerator(device: c_int) -> *mut c_void {
    if !(0..DEVICE_COUNT).contains(&device) {
        return ptr::null_mut();
    }
    Box::into_raw(Box::new(FakeDelegate { kind: 1, device })) as *mut c_void
}

unsafe extern "C" fn delegate_create_flex() -> *mut c_void {
    Box::into_raw(Box::new(FakeDelegate { kind: 2, device: -1 })) as *mut c_void
}

unsafe extern "C" fn delegate_delete(_kind: c_int, delegate: *mut c_void) {
    if !delegate.is_null() {
        drop(unsafe { Box::from_raw(delegate as *mut FakeDelegate) });
    }
}

unsafe extern "C" fn accelerator_device_count() -> c_int {
    DEVICE_COUNT
}

unsafe extern "C" fn accelerator_version() -> *const c_char {
    c"fake-accelerator 1.0".as_ptr()
}

static VERBOSITY: AtomicI32 = AtomicI32::new(0);

unsafe extern "C" fn accelerator_set_verbosity(level: c_int) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

static FAKE_ENGINE: EngineApi = EngineApi {
    model_create_from_file,
    model_create_from_buffer,
    model_delete,
    options_create,
    options_set_num_threads,
    options_add_delegate,
    options_set_error_reporter,
    options_delete,
    interpreter_create,
    interpreter_delete,
    interpreter_allocate_tensors,
    interpreter_invoke,
    interpreter_resize_input,
    interpreter_input_count,
    interpreter_output_count,
    interpreter_input_tensor,
    interpreter_output_tensor,
    tensor_type,
    tensor_num_dims,
    tensor_dim,
    tensor_byte_size,
    tensor_data,
    tensor_name,
    tensor_quantization,
    delegate_create_cpu_fallback,
    delegate_create_accelerator,
    delegate_create_flex,
    delegate_delete,
    accelerator_device_count,
    accelerator_version,
    accelerator_set_verbosity,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_validation() {
        assert!(parse_model(b"[]").is_none());
        assert!(parse_model(br#"{"inputs": [], "outputs": []}"#).is_none());
        assert!(
            parse_model(
                br#"{"inputs": [{"shape": [1, -1], "dtype": "float32"}],
                     "outputs": [{"shape": [1], "dtype": "float32"}]}"#
            )
            .is_none()
        );
        assert!(
            parse_model(
                br#"{"inputs": [{"shape": [2], "dtype": "complex128"}],
                     "outputs": [{"shape": [1], "dtype": "float32"}]}"#
            )
            .is_none()
        );
        let desc = parse_model(
            br#"{"inputs": [{"shape": [2, 3], "dtype": "uint8"}],
                 "outputs": [{"shape": [1], "dtype": "float32"}],
                 "ops": ["matmul"]}"#,
        )
        .unwrap();
        assert_eq!(desc.ops, vec!["matmul"]);
    }

    #[test]
    fn partitioning_respects_claim_order() {
        let ops = vec!["matmul".to_string(), "flex_range".to_string()];
        assert!(partition_ops(&ops, &[]).is_err());
        let assigned = partition_ops(&ops, &[(2, -1), (0, 1)]).unwrap();
        assert_eq!(assigned, vec![("matmul".to_string(), 0), ("flex_range".to_string(), 2)]);
    }

    #[test]
    fn output_fill_is_deterministic() {
        let desc = TensorDesc {
            name: String::new(),
            shape: vec![4],
            dtype: "float32".to_string(),
            scale: 0.0,
            zero_point: 0,
        };
        let a = build_tensor(&desc);
        let b = build_tensor(&desc);
        unsafe {
            fill_output(&mut *a, 42, 0);
            fill_output(&mut *b, 42, 0);
            assert_eq!((*a).buf, (*b).buf);
            drop(Box::from_raw(a));
            drop(Box::from_raw(b));
        }
    }
}
