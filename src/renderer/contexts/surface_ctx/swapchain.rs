use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::error::VkResultExt;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,

    device: Arc<ash::Device>,
}

impl Swapchain {
    /// `window_size` is only used when the surface leaves the extent to the application.
    /// Passing the swapchain being replaced lets the driver recycle its images.
    pub fn new(
        ctx: &RenderContext,
        window_size: vk::Extent2D,
        old_swapchain: Option<&Swapchain>,
    ) -> Result<Self> {
        let physical = ctx.device.physical;
        let surface = ctx.instance.surface;
        let surface_loader = &ctx.instance.surface_loader;

        let surface_capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical, surface)
                .classify("get_physical_device_surface_capabilities")?
        };
        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical, surface)
                .classify("get_physical_device_surface_formats")?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical, surface)
                .classify("get_physical_device_surface_present_modes")?
        };

        let format = choose_surface_format(&surface_formats)
            .ok_or_eyre("Surface reports no formats")?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&surface_capabilities, window_size);
        let min_image_count = choose_image_count(&surface_capabilities);
        let pre_transform = if surface_capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            surface_capabilities.current_transform
        };

        let family_indices = ctx.device.queue_family_indices();
        let sharing_mode = sharing_mode(&family_indices);

        let swapchain_loader = ash::khr::swapchain::Device::new(
            &ctx.instance.instance,
            &ctx.device.logical,
        );
        let mut swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain.map_or(vk::SwapchainKHR::null(), |s| s.swapchain));
        if sharing_mode == vk::SharingMode::CONCURRENT {
            swapchain_info = swapchain_info.queue_family_indices(&family_indices);
        }

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&swapchain_info, None)
                .classify("create_swapchain")?
        };

        let (images, image_views) = match Self::create_swapchain_images(
            swapchain,
            &swapchain_loader,
            format.format,
            &ctx.device.logical,
        ) {
            Ok(images) => images,
            Err(err) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(err);
            }
        };

        log::debug!(
            "Swapchain: {} images, {}x{}, {:?}, {:?}",
            images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode,
        );

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            extent,
            format,
            present_mode,
            device: ctx.device.logical.clone(),
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn create_swapchain_images(
        swapchain: vk::SwapchainKHR,
        swapchain_loader: &ash::khr::swapchain::Device,
        format: vk::Format,
        device: &ash::Device,
    ) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>)> {
        let images = unsafe {
            swapchain_loader
                .get_swapchain_images(swapchain)
                .classify("get_swapchain_images")?
        };
        let mut image_views = Vec::with_capacity(images.len());
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::R,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::B,
                    a: vk::ComponentSwizzle::A,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image(*image);
            match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => image_views.push(view),
                Err(err) => {
                    for view in image_views {
                        unsafe { device.destroy_image_view(view, None) };
                    }
                    return Err(err).classify("create_image_view");
                }
            }
        }

        Ok((images, image_views))
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// B8G8R8A8_SRGB with sRGB non-linear color space if offered, else the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX if offered, else FIFO which is always available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|mode| *mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum so acquiring never waits on the driver, within the maximum
/// (0 means unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    if max > 0 && min + 1 > max {
        max
    } else {
        min + 1
    }
}

/// Images are shared between queues only when graphics and present families differ
pub fn sharing_mode(unique_family_indices: &[u32]) -> vk::SharingMode {
    if unique_family_indices.len() > 1 {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_follows_surface() {
        let current = vk::Extent2D { width: 1920, height: 1080 };
        let caps = capabilities(2, 3, current);
        let extent = choose_extent(&caps, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(extent, current);
    }

    #[test]
    fn test_extent_clamps_window_size() {
        let caps = capabilities(2, 3, vk::Extent2D { width: u32::MAX, height: u32::MAX });
        let extent = choose_extent(&caps, vk::Extent2D { width: 10_000, height: 0 });
        assert_eq!(extent, vk::Extent2D { width: 4096, height: 1 });
    }

    #[test]
    fn test_image_count_within_bounds() {
        let current = vk::Extent2D { width: 1, height: 1 };
        assert_eq!(choose_image_count(&capabilities(2, 0, current)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 8, current)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 3, current)), 3);
        for (min, max) in [(1, 2), (2, 3), (3, 3), (2, 0)] {
            let count = choose_image_count(&capabilities(min, max, current));
            assert!(count >= min);
            assert!(max == 0 || count <= max);
        }
    }

    #[test]
    fn test_sharing_mode() {
        assert_eq!(sharing_mode(&[0]), vk::SharingMode::EXCLUSIVE);
        assert_eq!(sharing_mode(&[0, 2]), vk::SharingMode::CONCURRENT);
    }
}
