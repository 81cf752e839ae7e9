//! Network building blocks.

mod split_conv;

pub use split_conv::{ChannelSplit, SplitConv2d, SplitConv2dConfig};
