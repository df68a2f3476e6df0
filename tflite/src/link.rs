//! Binding of the engine table to the system TensorFlow Lite C library.
//!
//! Enabled with the `link` feature. Requires `libtensorflowlite_c` plus the
//! Edge TPU (`libedgetpu`) and Flex (`libtensorflowlite_flex`) libraries at
//! link time. Declarations are hand-written for the subset the binding
//! needs, avoiding bindgen complexity.

use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use crate::error::Error;
use crate::ffi::{self, EngineApi, RawQuantizationParams, ReporterFn};

/// Installs the linked engine table.
pub fn install() -> Result<(), Error> {
    ffi::install(&LINKED_ENGINE)
}

#[repr(C)]
struct EdgetpuDevice {
    device_type: c_int,
    path: *const c_char,
}

#[link(name = "tensorflowlite_c")]
unsafe extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut c_void;
    fn TfLiteModelCreate(model_data: *const c_void, model_size: usize) -> *mut c_void;
    fn TfLiteModelDelete(model: *mut c_void);
    fn TfLiteInterpreterOptionsCreate() -> *mut c_void;
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut c_void, num_threads: c_int);
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut c_void, delegate: *mut c_void);
    fn TfLiteInterpreterOptionsDelete(options: *mut c_void);
    fn TfLiteInterpreterCreate(model: *mut c_void, options: *mut c_void) -> *mut c_void;
    fn TfLiteInterpreterDelete(interpreter: *mut c_void);
    fn TfLiteInterpreterAllocateTensors(interpreter: *mut c_void) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut c_void) -> c_int;
    fn TfLiteInterpreterResizeInputTensor(
        interpreter: *mut c_void,
        input_index: c_int,
        input_dims: *const c_int,
        input_dims_size: c_int,
    ) -> c_int;
    fn TfLiteInterpreterGetInputTensorCount(interpreter: *mut c_void) -> c_int;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *mut c_void) -> c_int;
    fn TfLiteInterpreterGetInputTensor(interpreter: *mut c_void, index: c_int) -> *mut c_void;
    fn TfLiteInterpreterGetOutputTensor(
        interpreter: *mut c_void,
        index: c_int,
    ) -> *const c_void;
    fn TfLiteTensorType(tensor: *const c_void) -> c_int;
    fn TfLiteTensorNumDims(tensor: *const c_void) -> c_int;
    fn TfLiteTensorDim(tensor: *const c_void, index: c_int) -> c_int;
    fn TfLiteTensorByteSize(tensor: *const c_void) -> usize;
    fn TfLiteTensorData(tensor: *const c_void) -> *mut c_void;
    fn TfLiteTensorName(tensor: *const c_void) -> *const c_char;
    fn TfLiteTensorQuantizationParams(tensor: *const c_void) -> RawQuantizationParams;
    fn TfLiteXNNPackDelegateCreate(options: *const c_void) -> *mut c_void;
    fn TfLiteXNNPackDelegateDelete(delegate: *mut c_void);
}

#[link(name = "edgetpu")]
unsafe extern "C" {
    fn edgetpu_list_devices(num_devices: *mut usize) -> *mut EdgetpuDevice;
    fn edgetpu_free_devices(dev: *mut EdgetpuDevice);
    fn edgetpu_create_delegate(
        device_type: c_int,
        name: *const c_char,
        options: *const c_void,
        num_options: usize,
    ) -> *mut c_void;
    fn edgetpu_free_delegate(delegate: *mut c_void);
    fn edgetpu_verbosity(verbosity: c_int);
    fn edgetpu_version() -> *const c_char;
}

#[link(name = "tensorflowlite_flex")]
unsafe extern "C" {
    fn TfLiteFlexDelegateCreate() -> *mut c_void;
    fn TfLiteFlexDelegateDelete(delegate: *mut c_void);
}

unsafe extern "C" fn options_set_error_reporter(
    _options: *mut c_void,
    _reporter: ReporterFn,
    _user_data: *mut c_void,
) {
    // The C API's reporter takes a va_list, which cannot be expanded
    // without a C shim; under `link` the engine's default stderr reporter
    // stays in place.
}

unsafe extern "C" fn delegate_create_cpu_fallback(_num_threads: c_int) -> *mut c_void {
    // Null options = engine defaults. The XNNPACK options struct layout
    // varies across engine versions, so it is not declared here; the
    // per-invoke pool from `Options::set_thread_count` still applies.
    unsafe { TfLiteXNNPackDelegateCreate(ptr::null()) }
}

unsafe extern "C" fn delegate_create_accelerator(device: c_int) -> *mut c_void {
    unsafe {
        let mut count: usize = 0;
        let list = edgetpu_list_devices(&mut count);
        if list.is_null() {
            return ptr::null_mut();
        }
        if device < 0 || device as usize >= count {
            edgetpu_free_devices(list);
            return ptr::null_mut();
        }
        let dev = list.add(device as usize);
        let delegate =
            edgetpu_create_delegate((*dev).device_type, (*dev).path, ptr::null(), 0);
        edgetpu_free_devices(list);
        delegate
    }
}

unsafe extern "C" fn delegate_delete(kind: c_int, delegate: *mut c_void) {
    unsafe {
        match kind {
            0 => TfLiteXNNPackDelegateDelete(delegate),
            1 => edgetpu_free_delegate(delegate),
            _ => TfLiteFlexDelegateDelete(delegate),
        }
    }
}

unsafe extern "C" fn accelerator_device_count() -> c_int {
    unsafe {
        let mut count: usize = 0;
        let list = edgetpu_list_devices(&mut count);
        if !list.is_null() {
            edgetpu_free_devices(list);
        }
        count as c_int
    }
}

static LINKED_ENGINE: EngineApi = EngineApi {
    model_create_from_file: TfLiteModelCreateFromFile,
    model_create_from_buffer: TfLiteModelCreate,
    model_delete: TfLiteModelDelete,
    options_create: TfLiteInterpreterOptionsCreate,
    options_set_num_threads: TfLiteInterpreterOptionsSetNumThreads,
    options_add_delegate: TfLiteInterpreterOptionsAddDelegate,
    options_set_error_reporter,
    options_delete: TfLiteInterpreterOptionsDelete,
    interpreter_create: TfLiteInterpreterCreate,
    interpreter_delete: TfLiteInterpreterDelete,
    interpreter_allocate_tensors: TfLiteInterpreterAllocateTensors,
    interpreter_invoke: TfLiteInterpreterInvoke,
    interpreter_resize_input: TfLiteInterpreterResizeInputTensor,
    interpreter_input_count: TfLiteInterpreterGetInputTensorCount,
    interpreter_output_count: TfLiteInterpreterGetOutputTensorCount,
    interpreter_input_tensor: TfLiteInterpreterGetInputTensor,
    interpreter_output_tensor: TfLiteInterpreterGetOutputTensor,
    tensor_type: TfLiteTensorType,
    tensor_num_dims: TfLiteTensorNumDims,
    tensor_dim: TfLiteTensorDim,
    tensor_byte_size: TfLiteTensorByteSize,
    tensor_data: TfLiteTensorData,
    tensor_name: TfLiteTensorName,
    tensor_quantization: TfLiteTensorQuantizationParams,
    delegate_create_cpu_fallback,
    delegate_create_accelerator,
    delegate_create_flex: TfLiteFlexDelegateCreate,
    delegate_delete,
    accelerator_device_count,
    accelerator_version: edgetpu_version,
    accelerator_set_verbosity: edgetpu_verbosity,
};
