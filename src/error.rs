/// Failures reported by a device while creating resources
/// or executing a submission.
///
/// Misuse of the recording API is not reported through this type;
/// it panics at the call site.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("the device was lost")]
    DeviceLost,
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfDeviceMemory { requested: usize, available: usize },
    #[error("image dimensions {width}x{height} exceed the device limit of {max}")]
    ImageTooLarge { width: u32, height: u32, max: u32 },
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
