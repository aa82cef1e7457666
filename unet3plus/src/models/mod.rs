pub mod decoder;
pub mod encoder;
pub mod init;
pub mod modules;
pub mod unet3plus;

pub use decoder::{Decoder, DecoderStage};
pub use encoder::{ChannelProjection, Encoder};
pub use init::conv_initializer;
pub use unet3plus::{
    AuxHead, ClassificationHead, Predictions, SegmentationHead, UNet3Plus, UNet3PlusRecord,
};
