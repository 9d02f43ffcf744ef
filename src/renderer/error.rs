use std::fmt;
use ash::vk;

/// Failure classes of the renderer. Only `RecoverableSurface` is ever handled internally,
/// by rebuilding the surface and skipping the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Unexpected native API failure, device loss, unsupported format or feature
    FatalDevice(String),
    /// The surface is out of date or suboptimal and must be rebuilt
    RecoverableSurface(vk::Result),
    /// Memory or descriptor pool exhausted
    ResourceExhaustion(String),
    /// A shader stage could not be loaded or turned into a module
    ShaderBuild(String),
}

impl RenderError {
    /// Classify a raw Vulkan result returned by `call`
    pub fn from_vk(call: &str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
                Self::RecoverableSurface(result)
            }
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL
            | vk::Result::ERROR_FRAGMENTATION => {
                Self::ResourceExhaustion(format!("{}: {}", call, result))
            }
            _ => Self::FatalDevice(format!("{}: {}", call, result)),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RecoverableSurface(_))
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalDevice(msg) => write!(f, "Fatal device error: {}", msg),
            Self::RecoverableSurface(result) => write!(f, "Surface must be recreated: {}", result),
            Self::ResourceExhaustion(msg) => write!(f, "Resource exhaustion: {}", msg),
            Self::ShaderBuild(msg) => write!(f, "Shader build error: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

/// Attach a call name to a raw `VkResult` and turn it into a classified report
pub trait VkResultExt<T> {
    fn classify(self, call: &str) -> color_eyre::Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn classify(self, call: &str) -> color_eyre::Result<T> {
        self.map_err(|result| RenderError::from_vk(call, result).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_is_recoverable() {
        let err = RenderError::from_vk("acquire", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(err.is_recoverable());
        let err = RenderError::from_vk("present", vk::Result::SUBOPTIMAL_KHR);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_pool_exhaustion_is_resource_exhaustion() {
        let err = RenderError::from_vk("allocate sets", vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        assert!(matches!(err, RenderError::ResourceExhaustion(_)));
        let err = RenderError::from_vk("allocate", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(err, RenderError::ResourceExhaustion(_)));
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let err = RenderError::from_vk("submit", vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, RenderError::FatalDevice(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_classified_report_downcasts() {
        let result: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST);
        let report = result.classify("wait").unwrap_err();
        let err = report.downcast_ref::<RenderError>().unwrap();
        assert!(matches!(err, RenderError::FatalDevice(msg) if msg.starts_with("wait")));
    }

    #[test]
    fn test_allocation_failure_downcasts_to_exhaustion() {
        fn create() -> color_eyre::Result<u32> {
            let created: ash::prelude::VkResult<u32> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            let handle = created.classify("create_buffer")?;
            Ok(handle)
        }
        let report = create().unwrap_err();
        let err = report.downcast_ref::<RenderError>().unwrap();
        assert!(matches!(err, RenderError::ResourceExhaustion(msg) if msg.starts_with("create_buffer")));
    }
}
