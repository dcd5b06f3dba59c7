pub mod traits;
pub mod xz;

pub use traits::CompressionInterface;
pub use xz::XzCompressor;
