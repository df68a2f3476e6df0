//! Raw C-ABI surface shared with the native inference engine.
//!
//! The engine is consumed through a function-pointer table ([`EngineApi`]),
//! the same shape as ONNX Runtime's `OrtApi`. Exactly one table is installed
//! per process: the `link` feature installs the system TensorFlow Lite C
//! library, tests and the `fake-engine` feature install the in-process fake.

use std::os::raw::{c_char, c_int, c_void};

use once_cell::sync::OnceCell;

use crate::error::Error;

// Opaque handle types. The engine allocates and frees these; the safe
// wrappers only move the pointers around.
pub type NativeModel = c_void;
pub type NativeOptions = c_void;
pub type NativeInterpreter = c_void;
pub type NativeTensor = c_void;
pub type NativeDelegate = c_void;

// Status codes, matching TfLiteStatus.
pub const STATUS_OK: c_int = 0;
pub const STATUS_ERROR: c_int = 1;
pub const STATUS_DELEGATE_ERROR: c_int = 2;

/// Affine quantization parameters as laid out by the C API.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct RawQuantizationParams {
    pub scale: f32,
    pub zero_point: i32,
}

/// Error-reporter trampoline. The engine calls it with a formatted message
/// and the user-data pointer registered on the options.
pub type ReporterFn = unsafe extern "C" fn(user_data: *mut c_void, msg: *const c_char);

/// Entry points the binding needs from the engine.
///
/// Delegate handles are created and deleted per kind; `delegate_delete`
/// receives the kind discriminant because the engine routes deletion to the
/// back end that created the handle.
#[repr(C)]
pub struct EngineApi {
    // Model
    pub model_create_from_file:
        unsafe extern "C" fn(path: *const c_char) -> *mut NativeModel,
    pub model_create_from_buffer:
        unsafe extern "C" fn(data: *const c_void, len: usize) -> *mut NativeModel,
    pub model_delete: unsafe extern "C" fn(model: *mut NativeModel),

    // Options
    pub options_create: unsafe extern "C" fn() -> *mut NativeOptions,
    pub options_set_num_threads: unsafe extern "C" fn(opts: *mut NativeOptions, n: c_int),
    pub options_add_delegate:
        unsafe extern "C" fn(opts: *mut NativeOptions, delegate: *mut NativeDelegate),
    pub options_set_error_reporter: unsafe extern "C" fn(
        opts: *mut NativeOptions,
        reporter: ReporterFn,
        user_data: *mut c_void,
    ),
    pub options_delete: unsafe extern "C" fn(opts: *mut NativeOptions),

    // Interpreter
    pub interpreter_create: unsafe extern "C" fn(
        model: *mut NativeModel,
        opts: *mut NativeOptions,
    ) -> *mut NativeInterpreter,
    pub interpreter_delete: unsafe extern "C" fn(interp: *mut NativeInterpreter),
    pub interpreter_allocate_tensors:
        unsafe extern "C" fn(interp: *mut NativeInterpreter) -> c_int,
    pub interpreter_invoke: unsafe extern "C" fn(interp: *mut NativeInterpreter) -> c_int,
    pub interpreter_resize_input: unsafe extern "C" fn(
        interp: *mut NativeInterpreter,
        index: c_int,
        dims: *const c_int,
        ndims: c_int,
    ) -> c_int,
    pub interpreter_input_count:
        unsafe extern "C" fn(interp: *mut NativeInterpreter) -> c_int,
    pub interpreter_output_count:
        unsafe extern "C" fn(interp: *mut NativeInterpreter) -> c_int,
    pub interpreter_input_tensor: unsafe extern "C" fn(
        interp: *mut NativeInterpreter,
        index: c_int,
    ) -> *mut NativeTensor,
    pub interpreter_output_tensor: unsafe extern "C" fn(
        interp: *mut NativeInterpreter,
        index: c_int,
    ) -> *const NativeTensor,

    // Tensor
    pub tensor_type: unsafe extern "C" fn(tensor: *const NativeTensor) -> c_int,
    pub tensor_num_dims: unsafe extern "C" fn(tensor: *const NativeTensor) -> c_int,
    pub tensor_dim: unsafe extern "C" fn(tensor: *const NativeTensor, index: c_int) -> c_int,
    pub tensor_byte_size: unsafe extern "C" fn(tensor: *const NativeTensor) -> usize,
    pub tensor_data: unsafe extern "C" fn(tensor: *const NativeTensor) -> *mut c_void,
    pub tensor_name: unsafe extern "C" fn(tensor: *const NativeTensor) -> *const c_char,
    pub tensor_quantization:
        unsafe extern "C" fn(tensor: *const NativeTensor) -> RawQuantizationParams,

    // Delegates
    pub delegate_create_cpu_fallback:
        unsafe extern "C" fn(num_threads: c_int) -> *mut NativeDelegate,
    pub delegate_create_accelerator:
        unsafe extern "C" fn(device: c_int) -> *mut NativeDelegate,
    pub delegate_create_flex: unsafe extern "C" fn() -> *mut NativeDelegate,
    pub delegate_delete: unsafe extern "C" fn(kind: c_int, delegate: *mut NativeDelegate),

    // Accelerator discovery
    pub accelerator_device_count: unsafe extern "C" fn() -> c_int,
    pub accelerator_version: unsafe extern "C" fn() -> *const c_char,
    pub accelerator_set_verbosity: unsafe extern "C" fn(level: c_int),
}

static ENGINE: OnceCell<&'static EngineApi> = OnceCell::new();

/// Installs the engine entry-point table for this process.
///
/// The first successful call wins and later calls with the same table are
/// no-ops; installing a different table afterwards is rejected.
pub fn install(api: &'static EngineApi) -> Result<(), Error> {
    let current = ENGINE.get_or_init(|| api);
    if std::ptr::eq(*current, api) {
        Ok(())
    } else {
        Err(Error::Contract("a different engine is already installed".into()))
    }
}

/// Returns the installed table, or [`Error::EngineMissing`].
pub(crate) fn api() -> Result<&'static EngineApi, Error> {
    ENGINE.get().copied().ok_or(Error::EngineMissing)
}
