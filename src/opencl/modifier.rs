//! GPU-side implementation of the elementwise `array[i] += i` transform.
//!
//! All OpenCL state (context, command queue, built program, kernel) is
//! owned by [`ArrayModifier`] and released by the `opencl3` wrappers when
//! it is dropped.

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{get_device_ids, Device, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::ClError;
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, CL_MEM_READ_WRITE};
use opencl3::platform::get_platforms;
use opencl3::program::Program;
use opencl3::types::{cl_int, CL_BLOCKING};
use std::ptr;

/// One work-item per element; the guard covers global sizes rounded up
/// past the end of the array.
const KERNEL_SOURCE: &str = r#"
__kernel void index_add(__global int * array, const int count) {
    int i = get_global_id(0);
    if (i < count) {
        array[i] += i;
    }
}
"#;

const KERNEL_NAME: &str = "index_add";

/// Configuration for selecting the OpenCL platform and device.
#[derive(Debug, Clone, Default)]
pub struct ArrayModifierConfig {
    /// OpenCL platform index (0 for the first platform)
    pub platform_index: usize,
    /// GPU device index within the platform (0 for the first GPU)
    pub device_index: usize,
}

/// Owns the OpenCL handles needed to run the `index_add` kernel.
pub struct ArrayModifier {
    kernel: Kernel,
    // The kernel references the program; keep it alive alongside.
    _program: Program,
    queue: CommandQueue,
    context: Context,
    device_name: String,
    work_group_size: usize,
}

impl ArrayModifier {
    /// Selects a platform and GPU device, creates a context and command
    /// queue, and compiles the kernel. Any failure aborts construction;
    /// no handle from a failed call is ever used.
    pub fn new(config: &ArrayModifierConfig) -> Result<Self> {
        let platforms = get_platforms().context("Failed to get OpenCL platforms")?;
        let platform = platforms.get(config.platform_index).with_context(|| {
            format!(
                "Platform index {} out of range ({} platform(s) available)",
                config.platform_index,
                platforms.len()
            )
        })?;
        log::info!(
            "Using platform {}: {}",
            config.platform_index,
            platform
                .name()
                .unwrap_or_else(|_| "Unknown Platform".to_string())
        );

        let device_ids = get_device_ids(platform.id(), CL_DEVICE_TYPE_GPU)
            .map_err(ClError::from)
            .context("Failed to get GPU devices for platform")?;
        let device_id = *device_ids.get(config.device_index).with_context(|| {
            format!(
                "Device index {} out of range ({} GPU device(s) available)",
                config.device_index,
                device_ids.len()
            )
        })?;
        let device = Device::new(device_id);
        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());
        log::info!("Using device {}: {}", config.device_index, device_name);

        let context = Context::from_device(&device).context("Failed to create context")?;
        let queue = unsafe { CommandQueue::create(&context, device.id(), 0) }
            .context("Failed to create command queue")?;

        // On failure the error string carries the compiler's build log.
        let program = Program::create_and_build_from_source(&context, KERNEL_SOURCE, "")
            .map_err(|build_log| anyhow!("Kernel build failed:\n{}", build_log))?;
        let kernel = Kernel::create(&program, KERNEL_NAME)
            .with_context(|| format!("Failed to create kernel '{}'", KERNEL_NAME))?;

        // Per-kernel limit; drivers may cap this below the device maximum.
        let work_group_size = kernel
            .get_work_group_size(device.id())
            .context("Failed to query kernel work-group size")?;
        log::debug!("Work-group size: {}", work_group_size);

        Ok(Self {
            kernel,
            _program: program,
            queue,
            context,
            device_name,
            work_group_size,
        })
    }

    /// Name of the selected device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Work-group size used as the local size for the dispatch.
    pub fn work_group_size(&self) -> usize {
        self.work_group_size
    }

    /// Runs `data[i] += i` over the whole slice on the device.
    ///
    /// Uploads the slice to a device buffer, dispatches one work-item per
    /// element (global size rounded up to a work-group multiple), blocks
    /// until completion and reads the result back in place.
    pub fn run(&self, data: &mut [cl_int]) -> Result<()> {
        let count = validate_count(data.len())?;

        let mut buffer = unsafe {
            Buffer::<cl_int>::create(
                &self.context,
                CL_MEM_READ_WRITE,
                data.len(),
                ptr::null_mut(),
            )
        }
        .context("Failed to create device buffer")?;

        unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer, CL_BLOCKING, 0, data, &[])
        }
        .context("Failed to copy array to device")?;

        let global_size = rounded_global_size(data.len(), self.work_group_size);
        log::debug!(
            "Dispatching {} element(s), global size {}, local size {}",
            data.len(),
            global_size,
            self.work_group_size
        );

        let kernel_event = unsafe {
            ExecuteKernel::new(&self.kernel)
                .set_arg(&buffer)
                .set_arg(&count)
                .set_global_work_size(global_size)
                .set_local_work_size(self.work_group_size)
                .enqueue_nd_range(&self.queue)
        }
        .context("Failed to enqueue kernel")?;
        kernel_event.wait().context("Kernel execution failed")?;

        unsafe {
            self.queue
                .enqueue_read_buffer(&buffer, CL_BLOCKING, 0, data, &[])
        }
        .context("Failed to copy results back to host")?;
        self.queue
            .finish()
            .context("Failed to drain command queue")?;

        Ok(())
    }
}

/// Checks that a slice of this length can be dispatched: non-empty and
/// indexable by the kernel's `int` count argument.
fn validate_count(len: usize) -> Result<cl_int> {
    if len == 0 {
        bail!("Array is empty; nothing to dispatch");
    }
    cl_int::try_from(len).context("Array length exceeds the kernel's index range")
}

/// Rounds `count` up to the next multiple of `local` so every element gets
/// a work-item.
fn rounded_global_size(count: usize, local: usize) -> usize {
    count.div_ceil(local) * local
}

#[cfg(test)]
mod tests {
    use super::{rounded_global_size, validate_count, ArrayModifier, ArrayModifierConfig};
    use opencl3::types::cl_int;

    #[test]
    fn global_size_exact_multiple_is_unchanged() {
        assert_eq!(rounded_global_size(512, 256), 512);
        assert_eq!(rounded_global_size(256, 256), 256);
    }

    #[test]
    fn global_size_rounds_up_to_work_group_multiple() {
        assert_eq!(rounded_global_size(1, 256), 256);
        assert_eq!(rounded_global_size(257, 256), 512);
        assert_eq!(rounded_global_size(300, 64), 320);
    }

    #[test]
    #[ignore = "requires an OpenCL GPU"]
    fn dispatch_adds_index_to_every_element() {
        let modifier = ArrayModifier::new(&ArrayModifierConfig::default())
            .expect("OpenCL setup failed");

        let original: Vec<i32> = (0..512).map(|i| (i * 7 + 3) % 1000).collect();
        let mut modified = original.clone();
        modifier.run(&mut modified).expect("dispatch failed");

        for (i, (old, new)) in original.iter().zip(modified.iter()).enumerate() {
            assert_eq!(*new, *old + i as i32, "mismatch at index {}", i);
        }
    }

    #[test]
    #[ignore = "requires an OpenCL GPU"]
    fn dispatch_handles_size_not_a_work_group_multiple() {
        let modifier = ArrayModifier::new(&ArrayModifierConfig::default())
            .expect("OpenCL setup failed");

        // 300 is not a multiple of any common work-group size.
        let mut data = vec![1_i32; 300];
        modifier.run(&mut data).expect("dispatch failed");

        for (i, v) in data.iter().enumerate() {
            assert_eq!(*v, 1 + i as i32);
        }
    }

    #[test]
    fn count_accepts_typical_sizes() {
        assert_eq!(validate_count(1).unwrap(), 1);
        assert_eq!(validate_count(512).unwrap(), 512);
        assert_eq!(validate_count(cl_int::MAX as usize).unwrap(), cl_int::MAX);
    }

    #[test]
    fn count_rejects_empty_input() {
        assert!(validate_count(0).is_err());
    }

    #[test]
    fn count_rejects_lengths_past_the_kernel_index_range() {
        assert!(validate_count(cl_int::MAX as usize + 1).is_err());
        assert!(validate_count(usize::MAX).is_err());
    }

    #[test]
    #[ignore = "requires an OpenCL GPU"]
    fn run_rejects_empty_input() {
        let modifier = ArrayModifier::new(&ArrayModifierConfig::default())
            .expect("OpenCL setup failed");
        assert!(modifier.run(&mut []).is_err());
    }
}
