pub mod conv_block;
pub mod skip_fusion;
pub mod utils;

pub use conv_block::ConvBnRelu;
pub use skip_fusion::{FullScaleFusion, FullScaleFusionConfig};
pub use utils::{resize, resize_like, upsample};
