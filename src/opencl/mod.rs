//! OpenCL module for kernel dispatch
//!
//! This module handles interaction with the GPU via OpenCL,
//! including device selection, kernel compilation, and running
//! the elementwise transform over a host array.

mod modifier;

pub use modifier::{ArrayModifier, ArrayModifierConfig};
