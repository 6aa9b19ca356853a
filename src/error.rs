//! Error types for the culling pipeline.
//!
//! Every fallible operation returns [`CullError`]. Errors fall into three
//! classes (see [`ErrorClass`]): configuration errors are raised at setup and
//! mean the pipeline refuses to start, device faults are raised while a frame
//! is in flight and are never retried, and usage errors flag host calls made
//! out of order.

use std::fmt;

/// Coarse classification used by callers to decide between abort and report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    DeviceFault,
    Usage,
}

/// Main error type for the culling pipeline.
#[derive(Debug)]
pub enum CullError {
    /// The viewport (and therefore the depth pyramid) has a zero dimension.
    InvalidViewport { width: u32, height: u32 },
    /// No LOD descriptors were supplied.
    EmptyLodTable,
    /// More LOD descriptors than the statistics block can bucket.
    TooManyLods { count: usize, max: usize },
    /// LOD distance thresholds are not strictly increasing.
    UnorderedLodThresholds { index: usize },
    /// The object grid produces no objects or overflows the slot index range.
    InvalidObjectGrid(u32),
    /// A device feature the pipeline depends on is unavailable.
    MissingFeature(String),
    /// A completion signal did not arrive within the allowed time.
    DeviceTimeout(String),
    /// An execution context stopped producing results (device lost, worker gone).
    DeviceLost(String),
    /// A Vulkan API call failed.
    Vulkan(String),
    /// Statistics were requested before the frame's completion signal was observed.
    StatsNotReady,
}

impl CullError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidViewport { .. }
            | Self::EmptyLodTable
            | Self::TooManyLods { .. }
            | Self::UnorderedLodThresholds { .. }
            | Self::InvalidObjectGrid(_)
            | Self::MissingFeature(_) => ErrorClass::Configuration,
            Self::DeviceTimeout(_) | Self::DeviceLost(_) | Self::Vulkan(_) => {
                ErrorClass::DeviceFault
            }
            Self::StatsNotReady => ErrorClass::Usage,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }

    pub fn is_device_fault(&self) -> bool {
        self.class() == ErrorClass::DeviceFault
    }
}

impl fmt::Display for CullError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidViewport { width, height } => {
                write!(f, "Invalid viewport: {width}x{height}")
            }
            Self::EmptyLodTable => write!(f, "LOD table is empty"),
            Self::TooManyLods { count, max } => {
                write!(f, "Too many LOD levels: {count} (max {max})")
            }
            Self::UnorderedLodThresholds { index } => write!(
                f,
                "LOD threshold at index {index} is not greater than its predecessor"
            ),
            Self::InvalidObjectGrid(size) => write!(f, "Invalid object grid size: {size}"),
            Self::MissingFeature(name) => write!(f, "Required device feature missing: {name}"),
            Self::DeviceTimeout(msg) => write!(f, "Device timeout: {msg}"),
            Self::DeviceLost(msg) => write!(f, "Device lost: {msg}"),
            Self::Vulkan(msg) => write!(f, "Vulkan error: {msg}"),
            Self::StatsNotReady => write!(f, "Statistics read before frame completion"),
        }
    }
}

impl std::error::Error for CullError {}

/// Convenient Result type alias for culling operations.
pub type Result<T> = std::result::Result<T, CullError>;

impl From<ash::vk::Result> for CullError {
    fn from(result: ash::vk::Result) -> Self {
        match result {
            ash::vk::Result::TIMEOUT => Self::DeviceTimeout(format!("{result:?}")),
            ash::vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost(format!("{result:?}")),
            _ => Self::Vulkan(format!("{result:?}")),
        }
    }
}
