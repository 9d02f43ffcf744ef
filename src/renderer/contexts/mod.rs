pub mod device_ctx;
pub mod surface_ctx;
pub mod command_ctx;
pub mod frame_ctx;
