/// Executable scratch pages, for tests that need callable generated code.
#[cfg(any(test, feature = "test-support"))]
pub mod allocator;
pub mod cache;
pub mod patcher;
pub mod redirect;
