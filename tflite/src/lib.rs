//! Rust bindings for the TensorFlow Lite C API.
//!
//! TensorFlow Lite is an on-device inference engine. This crate wraps its
//! C API behind safe Rust types for [`Model`], [`Options`], [`Interpreter`],
//! and [`Tensor`], plus the pluggable delegate back ends (CPU fallback,
//! accelerator, operator flex).
//!
//! The engine is reached through an entry-point table installed once per
//! process: the `link` feature binds the system libraries, tests and the
//! `fake-engine` feature use the in-process fake, and
//! [`install_default_engine`] picks whichever provider the build carries.
//!
//! # Usage
//!
//! ```no_run
//! use giztoy_tflite::{Interpreter, Model, Options};
//!
//! # fn main() -> Result<(), giztoy_tflite::Error> {
//! giztoy_tflite::install_default_engine()?;
//!
//! let model = Model::from_file("mnist.tflite")?;
//! let mut options = Options::new();
//! options.set_thread_count(4);
//!
//! let mut interp = Interpreter::new(&model, Some(options))?;
//! interp.allocate_tensors()?;
//! interp.input_mut(0)?.as_f32_mut()?.fill(0.0);
//! interp.invoke()?;
//! let scores = interp.output(0)?.as_f32()?.to_vec();
//! # Ok(()) }
//! ```
//!
//! A single interpreter runs one invoke at a time (`&mut self` enforces
//! it); distinct interpreters, even ones sharing a [`Model`], may run
//! concurrently on separate threads.

mod delegate;
mod error;
pub mod ffi;
mod tflite;

#[cfg(any(test, feature = "fake-engine"))]
pub mod fake;
#[cfg(feature = "link")]
pub mod link;

pub use delegate::{Delegate, DelegateKind, accelerator};
pub use error::Error;
pub use tflite::{
    ElementType, Interpreter, Model, Options, QuantizationParams, Tensor, TensorMut,
};

/// Installs whichever engine this build carries: the system libraries under
/// the `link` feature, otherwise the fake engine when `fake-engine` is
/// enabled.
pub fn install_default_engine() -> Result<(), Error> {
    #[cfg(feature = "link")]
    {
        link::install()
    }
    #[cfg(all(not(feature = "link"), feature = "fake-engine"))]
    {
        fake::install()
    }
    #[cfg(all(not(feature = "link"), not(feature = "fake-engine")))]
    {
        Err(Error::EngineMissing)
    }
}
