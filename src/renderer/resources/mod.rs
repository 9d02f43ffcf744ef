/// "Resources" are the GPU objects built on top of the device context.
/// Each one owns its native handles and releases them on drop.

pub mod buffer;
pub mod image;
pub mod shader;
pub mod pipeline;
pub mod geometry;
pub mod texture;
pub mod descriptors;
