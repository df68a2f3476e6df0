//! Pluggable execution back ends.
//!
//! A delegate claims a subset of the graph's operators for an alternate
//! kernel implementation: optimized CPU kernels, a dedicated accelerator
//! device, or a full secondary runtime for operators the built-in kernel
//! set does not cover. Delegates are created independently, attached to
//! [`Options`](crate::Options) before the interpreter is built, and kept
//! alive by every interpreter built from those options.

use std::ffi::CStr;
use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use crate::error::Error;
use crate::ffi;

/// Which back end a delegate drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegateKind {
    /// Optimized CPU kernels with their own thread pool.
    CpuFallback = 0,
    /// A dedicated accelerator device.
    Accelerator = 1,
    /// Dispatches operators outside the built-in kernel set to a secondary
    /// full-featured runtime.
    OperatorFlex = 2,
}

/// Capability object wrapping a native delegate handle.
///
/// Cheap to clone; the native handle is released only after every clone is
/// gone, including those held by interpreters, so a delegate can never be
/// freed out from under a live interpreter.
pub struct Delegate {
    inner: Arc<DelegateInner>,
}

struct DelegateInner {
    api: &'static ffi::EngineApi,
    raw: *mut ffi::NativeDelegate,
    kind: DelegateKind,
}

// The handle is configured at creation and read-only afterwards.
unsafe impl Send for DelegateInner {}
unsafe impl Sync for DelegateInner {}

impl Delegate {
    /// Optimized CPU kernel delegate with `num_threads` workers
    /// (clamped to at least 1).
    pub fn cpu_fallback(num_threads: i32) -> Result<Self, Error> {
        let api = ffi::api()?;
        let raw = unsafe { (api.delegate_create_cpu_fallback)(num_threads.max(1)) };
        Self::wrap(api, raw, DelegateKind::CpuFallback, "cpu fallback kernels not linked")
    }

    /// Delegate bound to one device from [`accelerator::devices`].
    pub fn accelerator(device: &accelerator::AcceleratorDevice) -> Result<Self, Error> {
        let api = ffi::api()?;
        let raw = unsafe { (api.delegate_create_accelerator)(device.index()) };
        Self::wrap(
            api,
            raw,
            DelegateKind::Accelerator,
            "accelerator device not present",
        )
    }

    /// Delegate dispatching unsupported operators to the secondary runtime.
    pub fn operator_flex() -> Result<Self, Error> {
        let api = ffi::api()?;
        let raw = unsafe { (api.delegate_create_flex)() };
        Self::wrap(api, raw, DelegateKind::OperatorFlex, "flex runtime not linked")
    }

    fn wrap(
        api: &'static ffi::EngineApi,
        raw: *mut ffi::NativeDelegate,
        kind: DelegateKind,
        cause: &str,
    ) -> Result<Self, Error> {
        if raw.is_null() {
            return Err(Error::DelegateUnavailable(cause.into()));
        }
        Ok(Delegate {
            inner: Arc::new(DelegateInner { api, raw, kind }),
        })
    }

    pub fn kind(&self) -> DelegateKind {
        self.inner.kind
    }

    pub(crate) fn as_native_handle(&self) -> *mut ffi::NativeDelegate {
        self.inner.raw
    }
}

impl Clone for Delegate {
    fn clone(&self) -> Self {
        Delegate { inner: Arc::clone(&self.inner) }
    }
}

impl Drop for DelegateInner {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { (self.api.delegate_delete)(self.kind as c_int, self.raw) };
            self.raw = ptr::null_mut();
        }
    }
}

pub mod accelerator {
    //! Accelerator device discovery and runtime queries.

    use super::*;

    /// One enumerated accelerator device.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AcceleratorDevice {
        pub(crate) index: i32,
    }

    impl AcceleratorDevice {
        pub fn index(&self) -> i32 {
            self.index
        }
    }

    /// Enumerates the accelerator devices visible to the engine.
    /// Empty when none are attached.
    pub fn devices() -> Result<Vec<AcceleratorDevice>, Error> {
        let api = ffi::api()?;
        let count = unsafe { (api.accelerator_device_count)() };
        Ok((0..count.max(0)).map(|index| AcceleratorDevice { index }).collect())
    }

    /// The accelerator runtime's version string.
    pub fn version() -> Result<String, Error> {
        let api = ffi::api()?;
        let ptr = unsafe { (api.accelerator_version)() };
        if ptr.is_null() {
            return Err(Error::DelegateUnavailable("accelerator runtime not linked".into()));
        }
        Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    /// Sets the accelerator runtime's log verbosity.
    pub fn set_verbosity(level: i32) -> Result<(), Error> {
        let api = ffi::api()?;
        unsafe { (api.accelerator_set_verbosity)(level) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::accelerator::{self, AcceleratorDevice};
    use super::*;
    use crate::fake;
    use crate::{Interpreter, Model, Options};
    use serde_json::json;

    fn model_with_ops(ops: &[&str]) -> Model {
        fake::install().unwrap();
        let desc = json!({
            "inputs": [{"name": "x", "shape": [1, 4], "dtype": "float32"}],
            "outputs": [{"name": "y", "shape": [1, 2], "dtype": "float32"}],
            "ops": ops,
        });
        Model::from_buffer(serde_json::to_vec(&desc).unwrap()).unwrap()
    }

    #[test]
    fn factories_report_kind() {
        fake::install().unwrap();
        assert_eq!(Delegate::cpu_fallback(2).unwrap().kind(), DelegateKind::CpuFallback);
        assert_eq!(Delegate::operator_flex().unwrap().kind(), DelegateKind::OperatorFlex);
        let devices = accelerator::devices().unwrap();
        assert!(!devices.is_empty());
        let d = Delegate::accelerator(&devices[0]).unwrap();
        assert_eq!(d.kind(), DelegateKind::Accelerator);
        assert!(!accelerator::version().unwrap().is_empty());
        accelerator::set_verbosity(1).unwrap();
    }

    #[test]
    fn missing_accelerator_device_fails_fast() {
        fake::install().unwrap();
        let ghost = AcceleratorDevice { index: 99 };
        assert!(matches!(
            Delegate::accelerator(&ghost),
            Err(Error::DelegateUnavailable(_))
        ));
    }

    #[test]
    fn first_delegate_claiming_an_operator_wins() {
        let model = model_with_ops(&["matmul"]);
        let devices = accelerator::devices().unwrap();

        let mut options = Options::new();
        options.add_delegate(&Delegate::cpu_fallback(1).unwrap());
        options.add_delegate(&Delegate::accelerator(&devices[0]).unwrap());
        let mut interp = Interpreter::new(&model, Some(options)).unwrap();
        interp.allocate_tensors().unwrap();
        assert_eq!(
            fake::recorded_partition(&interp),
            vec![("matmul".to_string(), DelegateKind::CpuFallback as i32)]
        );

        let mut options = Options::new();
        options.add_delegate(&Delegate::accelerator(&devices[0]).unwrap());
        options.add_delegate(&Delegate::cpu_fallback(1).unwrap());
        let mut interp = Interpreter::new(&model, Some(options)).unwrap();
        interp.allocate_tensors().unwrap();
        assert_eq!(
            fake::recorded_partition(&interp),
            vec![("matmul".to_string(), DelegateKind::Accelerator as i32)]
        );
    }

    #[test]
    fn later_delegates_see_only_the_remainder() {
        // The accelerator cannot run `cpu_postprocess`, so it falls through
        // to the delegate added after it.
        let model = model_with_ops(&["matmul", "cpu_postprocess"]);
        let devices = accelerator::devices().unwrap();

        let mut options = Options::new();
        options.add_delegate(&Delegate::accelerator(&devices[0]).unwrap());
        options.add_delegate(&Delegate::cpu_fallback(1).unwrap());
        let mut interp = Interpreter::new(&model, Some(options)).unwrap();
        interp.allocate_tensors().unwrap();
        assert_eq!(
            fake::recorded_partition(&interp),
            vec![
                ("matmul".to_string(), DelegateKind::Accelerator as i32),
                ("cpu_postprocess".to_string(), DelegateKind::CpuFallback as i32),
            ]
        );
    }

    #[test]
    fn flex_ops_need_the_flex_delegate() {
        let model = model_with_ops(&["matmul", "flex_range"]);

        let mut interp = Interpreter::new(&model, None).unwrap();
        assert!(matches!(interp.allocate_tensors(), Err(Error::Allocation(_))));

        let mut options = Options::new();
        options.add_delegate(&Delegate::operator_flex().unwrap());
        let mut interp = Interpreter::new(&model, Some(options)).unwrap();
        interp.allocate_tensors().unwrap();
        interp.invoke().unwrap();
        assert_eq!(
            fake::recorded_partition(&interp),
            vec![
                ("matmul".to_string(), -1),
                ("flex_range".to_string(), DelegateKind::OperatorFlex as i32),
            ]
        );
    }

    #[test]
    fn graph_rejection_surfaces_at_construction() {
        let model = model_with_ops(&["reject_graph"]);
        assert!(matches!(
            Interpreter::new(&model, None),
            Err(Error::Load(_))
        ));
    }

    #[test]
    fn error_reporter_receives_engine_diagnostics() {
        use std::sync::{Arc, Mutex};

        let model = model_with_ops(&["flex_range"]);
        let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);

        let mut options = Options::new();
        options.set_error_reporter(Box::new(move |msg| {
            sink.lock().unwrap().push(msg.to_string());
        }));
        let mut interp = Interpreter::new(&model, Some(options)).unwrap();
        assert!(interp.allocate_tensors().is_err());

        let messages = messages.lock().unwrap();
        assert!(!messages.is_empty());
        assert!(messages[0].contains("flex_range"));
    }

    #[test]
    fn delegate_outlives_its_interpreter_structurally() {
        let model = model_with_ops(&["matmul"]);
        let delegate = Delegate::cpu_fallback(1).unwrap();

        let mut options = Options::new();
        options.add_delegate(&delegate);
        let mut interp = Interpreter::new(&model, Some(options)).unwrap();

        // Dropping the caller's handle must not free the native delegate
        // while the interpreter still uses it.
        drop(delegate);
        interp.allocate_tensors().unwrap();
        interp.invoke().unwrap();
    }
}
