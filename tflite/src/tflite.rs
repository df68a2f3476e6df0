//! Safe wrappers for the engine's Model, Options, Interpreter, and Tensor.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::delegate::Delegate;
use crate::error::Error;
use crate::ffi;

// ---------------------------------------------------------------------------
// Element types and quantization
// ---------------------------------------------------------------------------

/// Element type of a tensor, carrying the engine's discriminants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    Float32 = 1,
    Int32 = 2,
    UInt8 = 3,
    Int64 = 4,
    Bool = 6,
    Int16 = 7,
    Int8 = 9,
    Float16 = 10,
}

impl ElementType {
    fn from_raw(raw: c_int) -> Result<Self, Error> {
        Ok(match raw {
            1 => ElementType::Float32,
            2 => ElementType::Int32,
            3 => ElementType::UInt8,
            4 => ElementType::Int64,
            6 => ElementType::Bool,
            7 => ElementType::Int16,
            9 => ElementType::Int8,
            10 => ElementType::Float16,
            other => {
                return Err(Error::Contract(format!("unknown element type {other}")));
            }
        })
    }
}

/// Affine mapping between integer storage and real values:
/// `real = (stored - zero_point) * scale`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantizationParams {
    pub scale: f64,
    pub zero_point: i64,
}

impl QuantizationParams {
    // A scale of exactly 0 is treated as 1. Models in the wild carry
    // zeroed quantization params on tensors that are not actually
    // quantized; whether that is an engine default or an exporter quirk is
    // unclear, so identity is the compatible reading.
    fn effective_scale(&self) -> f64 {
        if self.scale == 0.0 { 1.0 } else { self.scale }
    }

    /// Maps a stored integer value to its real-valued meaning.
    pub fn dequantize(&self, stored: i64) -> f64 {
        (stored - self.zero_point) as f64 * self.effective_scale()
    }

    /// Maps a real value to the nearest stored integer value.
    pub fn quantize(&self, real: f64) -> i64 {
        (real / self.effective_scale()).round() as i64 + self.zero_point
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Immutable handle to a parsed model.
///
/// Cheap to clone; all clones share one native handle. Every [`Interpreter`]
/// keeps its own clone, so the native model is released only after the last
/// interpreter built from it is gone.
pub struct Model {
    inner: Arc<ModelInner>,
}

struct ModelInner {
    api: &'static ffi::EngineApi,
    raw: *mut ffi::NativeModel,
    // `from_buffer` models keep referencing the caller's bytes.
    _pinned: Option<Vec<u8>>,
}

// The native model is read-only after a successful load.
unsafe impl Send for ModelInner {}
unsafe impl Sync for ModelInner {}

impl Model {
    /// Loads and eagerly validates a model file.
    pub fn from_file(path: &str) -> Result<Self, Error> {
        let api = ffi::api()?;
        let c_path = CString::new(path).map_err(|e| Error::Load(e.to_string()))?;
        let raw = unsafe { (api.model_create_from_file)(c_path.as_ptr()) };
        if raw.is_null() {
            return Err(Error::Load(format!("cannot load model from {path:?}")));
        }
        Ok(Self {
            inner: Arc::new(ModelInner { api, raw, _pinned: None }),
        })
    }

    /// Loads and eagerly validates an in-memory model buffer.
    ///
    /// The bytes are pinned inside the returned model for as long as the
    /// native handle lives; the engine does not copy them.
    pub fn from_buffer(data: Vec<u8>) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::Load("empty model buffer".into()));
        }
        let api = ffi::api()?;
        let raw = unsafe {
            (api.model_create_from_buffer)(data.as_ptr() as *const c_void, data.len())
        };
        if raw.is_null() {
            return Err(Error::Load("model buffer failed validation".into()));
        }
        Ok(Self {
            inner: Arc::new(ModelInner { api, raw, _pinned: Some(data) }),
        })
    }

    pub(crate) fn raw(&self) -> *mut ffi::NativeModel {
        self.inner.raw
    }
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Model { inner: Arc::clone(&self.inner) }
    }
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { (self.api.model_delete)(self.raw) };
            self.raw = ptr::null_mut();
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Interpreter construction options.
///
/// Consumed by value in [`Interpreter::new`], so a configuration is applied
/// exactly once; there is no native options object to mutate behind a live
/// interpreter's back. Attached delegates are shared, not owned: the
/// interpreter keeps clones, and the caller's handles stay usable.
pub struct Options {
    thread_count: i32,
    delegates: Vec<Delegate>,
    reporter: Option<Box<dyn Fn(&str) + Send>>,
}

impl Options {
    /// Default options: a single engine thread and no delegates.
    pub fn new() -> Self {
        Options {
            thread_count: 1,
            delegates: Vec::new(),
            reporter: None,
        }
    }

    /// Sets the engine thread-pool size used within a single invoke.
    /// Values below 1 clamp to 1.
    pub fn set_thread_count(&mut self, n: i32) -> &mut Self {
        self.thread_count = n.max(1);
        self
    }

    /// Appends a delegate. Order matters: during graph build, delegates are
    /// offered operators in insertion order and the first claim wins; later
    /// delegates see only the remainder.
    pub fn add_delegate(&mut self, delegate: &Delegate) -> &mut Self {
        self.delegates.push(delegate.clone());
        self
    }

    /// Routes the engine's diagnostic messages to `reporter` instead of the
    /// engine default (stderr).
    pub fn set_error_reporter(&mut self, reporter: Box<dyn Fn(&str) + Send>) -> &mut Self {
        self.reporter = Some(reporter);
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new()
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Created,
    Allocated,
}

// Heap cell the error-reporter trampoline dereferences. Boxed so its
// address survives the move into the interpreter.
struct ReporterState {
    callback: Box<dyn Fn(&str) + Send>,
}

unsafe extern "C" fn reporter_trampoline(user_data: *mut c_void, msg: *const std::os::raw::c_char) {
    unsafe {
        if user_data.is_null() || msg.is_null() {
            return;
        }
        let state = &*(user_data as *const ReporterState);
        let msg = CStr::from_ptr(msg).to_string_lossy();
        (state.callback)(&msg);
    }
}

/// Stateful execution engine bound to one [`Model`] and one [`Options`]
/// snapshot.
///
/// The lifecycle is `new` → [`allocate_tensors`](Self::allocate_tensors) →
/// ([`invoke`](Self::invoke))*; tensors must be reallocated after
/// [`resize_input_tensor`](Self::resize_input_tensor). Tensor views borrow
/// the interpreter, so they can neither outlive it nor span a call that
/// re-lays-out the arena.
///
/// An interpreter may be moved to another thread, but a single instance
/// must only run one invoke at a time; `&mut self` makes that a
/// compile-time rule. Distinct interpreters sharing one model may run
/// concurrently.
pub struct Interpreter {
    api: &'static ffi::EngineApi,
    raw: *mut ffi::NativeInterpreter,
    state: State,
    // Keeps the model, delegates, and reporter state alive for as long as
    // the native interpreter references them.
    model: Model,
    delegates: Vec<Delegate>,
    _reporter: Option<Box<ReporterState>>,
}

// Single-owner use from any one thread; the engine arena is not reentrant,
// which `&mut self` on invoke already rules out. Not Sync.
unsafe impl Send for Interpreter {}

impl Interpreter {
    /// Builds an interpreter over `model`, consuming `options`.
    ///
    /// Fails when the engine rejects the graph, e.g. an invalid model
    /// handle or a delegate refusing the partition.
    pub fn new(model: &Model, options: Option<Options>) -> Result<Self, Error> {
        let api = ffi::api()?;
        let Options { thread_count, delegates, reporter } = options.unwrap_or_default();
        let reporter = reporter.map(|callback| Box::new(ReporterState { callback }));

        let raw_opts = unsafe { (api.options_create)() };
        if raw_opts.is_null() {
            return Err(Error::Load("engine failed to create options".into()));
        }
        unsafe {
            (api.options_set_num_threads)(raw_opts, thread_count);
            for d in &delegates {
                (api.options_add_delegate)(raw_opts, d.as_native_handle());
            }
            if let Some(r) = &reporter {
                let user_data = &**r as *const ReporterState as *mut c_void;
                (api.options_set_error_reporter)(raw_opts, reporter_trampoline, user_data);
            }
        }

        // The engine snapshots the options during construction; the native
        // options object is not needed afterwards.
        let raw = unsafe { (api.interpreter_create)(model.raw(), raw_opts) };
        unsafe { (api.options_delete)(raw_opts) };
        if raw.is_null() {
            return Err(Error::Load(
                "engine rejected the graph (invalid model or delegate refusal)".into(),
            ));
        }

        Ok(Interpreter {
            api,
            raw,
            state: State::Created,
            model: model.clone(),
            delegates,
            _reporter: reporter,
        })
    }

    /// Sizes and lays out the tensor arena.
    ///
    /// Must succeed at least once before [`invoke`](Self::invoke), and again
    /// after every [`resize_input_tensor`](Self::resize_input_tensor).
    /// Re-entrant: calling it again re-lays-out the arena with fresh
    /// buffers.
    pub fn allocate_tensors(&mut self) -> Result<(), Error> {
        let status = unsafe { (self.api.interpreter_allocate_tensors)(self.raw) };
        if status != ffi::STATUS_OK {
            self.state = State::Created;
            return Err(Error::Allocation(format!("engine status {status}")));
        }
        self.state = State::Allocated;
        Ok(())
    }

    /// Runs the graph synchronously on the calling thread.
    ///
    /// Blocking and CPU/accelerator-bound; there is no timeout and no
    /// cancellation point. On failure the output tensors are unspecified.
    pub fn invoke(&mut self) -> Result<(), Error> {
        if self.state != State::Allocated {
            return Err(Error::Contract("invoke before allocate_tensors".into()));
        }
        let status = unsafe { (self.api.interpreter_invoke)(self.raw) };
        if status != ffi::STATUS_OK {
            return Err(Error::Invoke(format!("engine status {status}")));
        }
        Ok(())
    }

    /// Declares a new shape for input `index`. The arena must be
    /// reallocated before the next invoke.
    pub fn resize_input_tensor(&mut self, index: usize, dims: &[i32]) -> Result<(), Error> {
        let count = self.input_tensor_count();
        if index >= count {
            return Err(Error::Contract(format!(
                "input tensor index {index} out of range 0..{count}"
            )));
        }
        let status = unsafe {
            (self.api.interpreter_resize_input)(
                self.raw,
                index as c_int,
                dims.as_ptr(),
                dims.len() as c_int,
            )
        };
        if status != ffi::STATUS_OK {
            return Err(Error::Contract(format!(
                "cannot resize input {index} to {dims:?} (engine status {status})"
            )));
        }
        self.state = State::Created;
        Ok(())
    }

    pub fn input_tensor_count(&self) -> usize {
        (unsafe { (self.api.interpreter_input_count)(self.raw) }) as usize
    }

    pub fn output_tensor_count(&self) -> usize {
        (unsafe { (self.api.interpreter_output_count)(self.raw) }) as usize
    }

    /// Read-only view of input tensor `index`.
    pub fn input(&self, index: usize) -> Result<Tensor<'_>, Error> {
        let raw = self.tensor_raw(index, false)?;
        Ok(Tensor { api: self.api, raw, _interp: PhantomData })
    }

    /// Writable view of input tensor `index`.
    pub fn input_mut(&mut self, index: usize) -> Result<TensorMut<'_>, Error> {
        let raw = self.tensor_raw(index, false)?;
        Ok(TensorMut {
            view: Tensor { api: self.api, raw, _interp: PhantomData },
        })
    }

    /// Read-only view of output tensor `index`.
    pub fn output(&self, index: usize) -> Result<Tensor<'_>, Error> {
        let raw = self.tensor_raw(index, true)?;
        Ok(Tensor { api: self.api, raw, _interp: PhantomData })
    }

    fn tensor_raw(&self, index: usize, output: bool) -> Result<*const ffi::NativeTensor, Error> {
        if self.state != State::Allocated {
            return Err(Error::Contract("tensors not allocated".into()));
        }
        let (count, which) = if output {
            (self.output_tensor_count(), "output")
        } else {
            (self.input_tensor_count(), "input")
        };
        if index >= count {
            return Err(Error::Contract(format!(
                "{which} tensor index {index} out of range 0..{count}"
            )));
        }
        let raw = if output {
            unsafe { (self.api.interpreter_output_tensor)(self.raw, index as c_int) }
        } else {
            unsafe { (self.api.interpreter_input_tensor)(self.raw, index as c_int) as *const _ }
        };
        if raw.is_null() {
            return Err(Error::Contract(format!("{which} tensor {index} unavailable")));
        }
        Ok(raw)
    }

    /// The model this interpreter executes.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Delegates attached at construction, in partition-offer order.
    pub fn delegates(&self) -> &[Delegate] {
        &self.delegates
    }

    #[cfg(any(test, feature = "fake-engine"))]
    pub(crate) fn raw_handle(&self) -> *mut ffi::NativeInterpreter {
        self.raw
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // The native interpreter goes first; the model, delegates, and
            // reporter state it references drop afterwards with the fields.
            unsafe { (self.api.interpreter_delete)(self.raw) };
            self.raw = ptr::null_mut();
        }
    }
}

// ---------------------------------------------------------------------------
// Tensor
// ---------------------------------------------------------------------------

/// Typed, shaped view over a buffer owned by the interpreter's arena.
///
/// A view is never an owner: it borrows the interpreter, and the borrow
/// checker retires it before anything can re-layout or free its backing
/// buffer. Exactly one typed accessor family is valid per element type;
/// the others return [`Error::Contract`] instead of reinterpreting bytes.
pub struct Tensor<'a> {
    api: &'static ffi::EngineApi,
    raw: *const ffi::NativeTensor,
    _interp: PhantomData<&'a Interpreter>,
}

impl Tensor<'_> {
    pub fn element_type(&self) -> Result<ElementType, Error> {
        ElementType::from_raw(unsafe { (self.api.tensor_type)(self.raw) })
    }

    pub fn num_dims(&self) -> usize {
        (unsafe { (self.api.tensor_num_dims)(self.raw) }) as usize
    }

    /// Length of dimension `index`; 0 when out of range.
    pub fn dim(&self, index: usize) -> usize {
        if index >= self.num_dims() {
            return 0;
        }
        (unsafe { (self.api.tensor_dim)(self.raw, index as c_int) }) as usize
    }

    pub fn shape(&self) -> Vec<usize> {
        (0..self.num_dims()).map(|i| self.dim(i)).collect()
    }

    pub fn byte_size(&self) -> usize {
        unsafe { (self.api.tensor_byte_size)(self.raw) }
    }

    /// The graph's name for this tensor; empty when the engine has none.
    pub fn name(&self) -> String {
        let ptr = unsafe { (self.api.tensor_name)(self.raw) };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    pub fn quantization(&self) -> QuantizationParams {
        let raw = unsafe { (self.api.tensor_quantization)(self.raw) };
        QuantizationParams {
            scale: raw.scale as f64,
            zero_point: raw.zero_point as i64,
        }
    }

    pub fn as_f32(&self) -> Result<&[f32], Error> {
        self.typed(ElementType::Float32)
    }

    pub fn as_u8(&self) -> Result<&[u8], Error> {
        self.typed(ElementType::UInt8)
    }

    pub fn as_i8(&self) -> Result<&[i8], Error> {
        self.typed(ElementType::Int8)
    }

    pub fn as_i32(&self) -> Result<&[i32], Error> {
        self.typed(ElementType::Int32)
    }

    pub fn as_i64(&self) -> Result<&[i64], Error> {
        self.typed(ElementType::Int64)
    }

    /// Copies the raw tensor bytes into `out`, whose length must equal
    /// [`byte_size`](Self::byte_size) exactly.
    pub fn copy_to_buffer(&self, out: &mut [u8]) -> Result<(), Error> {
        let size = self.byte_size();
        if out.len() != size {
            return Err(Error::Contract(format!(
                "buffer of {} bytes for a {size}-byte tensor",
                out.len()
            )));
        }
        let data = self.data_ptr()?;
        unsafe { ptr::copy_nonoverlapping(data as *const u8, out.as_mut_ptr(), size) };
        Ok(())
    }

    fn data_ptr(&self) -> Result<*mut c_void, Error> {
        let data = unsafe { (self.api.tensor_data)(self.raw) };
        if data.is_null() {
            return Err(Error::Contract("tensor has no data buffer".into()));
        }
        Ok(data)
    }

    fn typed<T>(&self, want: ElementType) -> Result<&[T], Error> {
        let got = self.element_type()?;
        if got != want {
            return Err(Error::Contract(format!("tensor holds {got:?}, not {want:?}")));
        }
        let data = self.data_ptr()?;
        let n = self.byte_size() / mem::size_of::<T>();
        Ok(unsafe { slice::from_raw_parts(data as *const T, n) })
    }
}

/// Writable view of an input tensor.
///
/// Obtained through `&mut Interpreter`, so no write can overlap a running
/// invoke or an arena re-layout. Derefs to [`Tensor`] for the read-only
/// surface.
pub struct TensorMut<'a> {
    view: Tensor<'a>,
}

impl<'a> Deref for TensorMut<'a> {
    type Target = Tensor<'a>;

    fn deref(&self) -> &Tensor<'a> {
        &self.view
    }
}

impl TensorMut<'_> {
    pub fn as_f32_mut(&mut self) -> Result<&mut [f32], Error> {
        self.typed_mut(ElementType::Float32)
    }

    pub fn as_u8_mut(&mut self) -> Result<&mut [u8], Error> {
        self.typed_mut(ElementType::UInt8)
    }

    pub fn as_i8_mut(&mut self) -> Result<&mut [i8], Error> {
        self.typed_mut(ElementType::Int8)
    }

    pub fn as_i32_mut(&mut self) -> Result<&mut [i32], Error> {
        self.typed_mut(ElementType::Int32)
    }

    pub fn as_i64_mut(&mut self) -> Result<&mut [i64], Error> {
        self.typed_mut(ElementType::Int64)
    }

    /// Overwrites the tensor with `data`, whose length must equal
    /// [`byte_size`](Tensor::byte_size) exactly. A mismatched buffer is
    /// rejected without touching the arena.
    pub fn copy_from_buffer(&mut self, data: &[u8]) -> Result<(), Error> {
        let size = self.view.byte_size();
        if data.len() != size {
            return Err(Error::Contract(format!(
                "buffer of {} bytes for a {size}-byte tensor",
                data.len()
            )));
        }
        let dst = self.view.data_ptr()?;
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, size) };
        Ok(())
    }

    fn typed_mut<T>(&mut self, want: ElementType) -> Result<&mut [T], Error> {
        let got = self.view.element_type()?;
        if got != want {
            return Err(Error::Contract(format!("tensor holds {got:?}, not {want:?}")));
        }
        let data = self.view.data_ptr()?;
        let n = self.view.byte_size() / mem::size_of::<T>();
        Ok(unsafe { slice::from_raw_parts_mut(data as *mut T, n) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake;
    use serde_json::json;

    fn model_from(desc: serde_json::Value) -> Model {
        fake::install().unwrap();
        Model::from_buffer(serde_json::to_vec(&desc).unwrap()).unwrap()
    }

    fn mnist_model() -> Model {
        model_from(json!({
            "inputs": [{"name": "image", "shape": [1, 28, 28, 1], "dtype": "float32"}],
            "outputs": [{"name": "scores", "shape": [1, 10], "dtype": "float32"}],
            "ops": ["conv2d", "relu", "softmax"],
        }))
    }

    #[test]
    fn model_load_failures() {
        fake::install().unwrap();
        assert!(matches!(Model::from_buffer(Vec::new()), Err(Error::Load(_))));
        assert!(matches!(
            Model::from_buffer(b"not a model".to_vec()),
            Err(Error::Load(_))
        ));
        assert!(matches!(
            Model::from_file("no/such/model.tflite"),
            Err(Error::Load(_))
        ));
    }

    #[test]
    fn end_to_end_mnist_shape() {
        let model = mnist_model();
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();

        assert!(interp.input_tensor_count() >= 1);
        assert_eq!(interp.output_tensor_count(), 1);

        let input = interp.input(0).unwrap();
        assert_eq!(input.shape(), vec![1, 28, 28, 1]);
        assert_eq!(input.element_type().unwrap(), ElementType::Float32);
        assert_eq!(input.name(), "image");
        assert_eq!(input.byte_size(), 28 * 28 * 4);

        interp.input_mut(0).unwrap().as_f32_mut().unwrap().fill(0.0);
        interp.invoke().unwrap();

        let output = interp.output(0).unwrap();
        let scores = output.as_f32().unwrap();
        assert_eq!(scores.len(), 10);
        let sum: f32 = scores.iter().sum();
        assert!(sum.is_finite());
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn invoke_is_deterministic() {
        let model = mnist_model();
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();
        for v in interp.input_mut(0).unwrap().as_f32_mut().unwrap() {
            *v = 0.5;
        }

        interp.invoke().unwrap();
        let first = interp.output(0).unwrap().as_f32().unwrap().to_vec();
        interp.invoke().unwrap();
        let second = interp.output(0).unwrap().as_f32().unwrap().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn invoke_before_allocate_is_rejected() {
        let model = mnist_model();
        let mut interp = Interpreter::new(&model, None).unwrap();
        assert!(matches!(interp.invoke(), Err(Error::Contract(_))));
    }

    #[test]
    fn tensor_access_before_allocate_is_rejected() {
        let model = mnist_model();
        let interp = Interpreter::new(&model, None).unwrap();
        assert!(matches!(interp.input(0), Err(Error::Contract(_))));
        assert!(matches!(interp.output(0), Err(Error::Contract(_))));
    }

    #[test]
    fn tensor_index_is_bounds_checked() {
        let model = mnist_model();
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();
        assert!(matches!(interp.input(1), Err(Error::Contract(_))));
        assert!(matches!(interp.output(7), Err(Error::Contract(_))));
    }

    #[test]
    fn wrong_typed_accessor_is_rejected() {
        let model = mnist_model();
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();
        let input = interp.input(0).unwrap();
        assert!(matches!(input.as_u8(), Err(Error::Contract(_))));
        assert!(matches!(input.as_i64(), Err(Error::Contract(_))));
        assert!(input.as_f32().is_ok());
    }

    #[test]
    fn byte_copies_check_sizes_and_do_not_bleed() {
        let model = model_from(json!({
            "inputs": [
                {"name": "a", "shape": [4], "dtype": "uint8"},
                {"name": "b", "shape": [4], "dtype": "uint8"},
            ],
            "outputs": [{"name": "out", "shape": [1], "dtype": "float32"}],
            "ops": ["concat"],
        }));
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();

        let mut a = interp.input_mut(0).unwrap();
        assert!(matches!(
            a.copy_from_buffer(&[1u8; 5]),
            Err(Error::Contract(_))
        ));
        a.copy_from_buffer(&[7u8; 4]).unwrap();

        // The neighbouring tensor keeps its zeroed arena contents.
        assert_eq!(interp.input(1).unwrap().as_u8().unwrap(), &[0u8; 4]);
        assert_eq!(interp.input(0).unwrap().as_u8().unwrap(), &[7u8; 4]);

        let mut out = [0u8; 3];
        assert!(matches!(
            interp.input(0).unwrap().copy_to_buffer(&mut out),
            Err(Error::Contract(_))
        ));
    }

    #[test]
    fn quantization_round_trip() {
        let qp = QuantizationParams { scale: 0.5, zero_point: 10 };
        assert_eq!(qp.dequantize(20), 5.0);
        assert_eq!(qp.dequantize(10), 0.0);
        assert_eq!(qp.quantize(5.0), 20);

        // scale == 0 is identity, not a division blow-up.
        let identity = QuantizationParams { scale: 0.0, zero_point: 0 };
        assert_eq!(identity.dequantize(7), 7.0);
        assert_eq!(identity.quantize(7.0), 7);
    }

    #[test]
    fn quantized_tensor_reports_params() {
        let model = model_from(json!({
            "inputs": [{
                "name": "pixels",
                "shape": [1, 4, 4, 3],
                "dtype": "uint8",
                "scale": 0.5,
                "zero_point": 10,
            }],
            "outputs": [{"name": "scores", "shape": [1, 2], "dtype": "uint8"}],
            "ops": ["conv2d"],
        }));
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();
        let qp = interp.input(0).unwrap().quantization();
        assert_eq!(qp, QuantizationParams { scale: 0.5, zero_point: 10 });
        assert_eq!(qp.dequantize(20), 5.0);
    }

    #[test]
    fn resize_requires_reallocation() {
        let model = model_from(json!({
            "inputs": [{"name": "x", "shape": [1, 8], "dtype": "float32"}],
            "outputs": [{"name": "y", "shape": [1, 2], "dtype": "float32"}],
            "ops": ["matmul"],
        }));
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();

        interp.resize_input_tensor(0, &[1, 16]).unwrap();
        assert!(matches!(interp.invoke(), Err(Error::Contract(_))));
        assert!(matches!(interp.input(0), Err(Error::Contract(_))));

        interp.allocate_tensors().unwrap();
        assert_eq!(interp.input(0).unwrap().shape(), vec![1, 16]);
        interp.invoke().unwrap();

        assert!(matches!(
            interp.resize_input_tensor(3, &[1, 1]),
            Err(Error::Contract(_))
        ));
    }

    #[test]
    fn thread_count_clamps_to_one() {
        let mut options = Options::new();
        options.set_thread_count(0);
        assert_eq!(options.thread_count, 1);
        options.set_thread_count(-4);
        assert_eq!(options.thread_count, 1);
        options.set_thread_count(8);
        assert_eq!(options.thread_count, 8);

        let model = mnist_model();
        let mut options = Options::new();
        options.set_thread_count(-2);
        let interp = Interpreter::new(&model, Some(options)).unwrap();
        assert_eq!(fake::recorded_thread_count(&interp), 1);
    }

    #[test]
    fn interpreters_share_one_model() {
        let model = mnist_model();
        let mut a = Interpreter::new(&model, None).unwrap();
        let mut b = Interpreter::new(&model, None).unwrap();
        drop(model);

        // Both interpreters keep the model alive through their own clones.
        a.allocate_tensors().unwrap();
        b.allocate_tensors().unwrap();
        a.invoke().unwrap();
        b.invoke().unwrap();
    }

    #[test]
    fn interpreter_moves_to_worker_thread() {
        let model = mnist_model();
        let mut interp = Interpreter::new(&model, None).unwrap();
        interp.allocate_tensors().unwrap();

        let handle = std::thread::spawn(move || {
            interp.invoke().unwrap();
            interp.output(0).unwrap().as_f32().unwrap().to_vec()
        });
        let scores = handle.join().unwrap();
        assert_eq!(scores.len(), 10);
    }
}
