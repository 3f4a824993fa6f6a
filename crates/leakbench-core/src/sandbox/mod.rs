//! Sandboxed execution of agent code.
//!
//! A [`SandboxExecutor`] wraps one episode's [`Kernel`], meters printed
//! values with a [`PrintQuota`] and truncates captured output. Code errors
//! are reported back as data; only aborts and kernel failures are errors.

pub mod error;
pub mod executor;
pub mod kernel;
pub mod python;
pub mod quota;

pub use error::{SandboxError, SandboxResult};
pub use executor::{truncate_output, ExecutionReport, SandboxExecutor, TRUNCATION_MARKER};
pub use kernel::{FragmentResult, Kernel, KernelHost, KernelLauncher, NamespaceSeed};
pub use python::{PythonKernel, PythonLauncher};
pub use quota::{PrintQuota, QUOTA_EXCEEDED_MESSAGE};
