//! Polyp detection demo.
//!
//! Two halves:
//!
//! - [`nn`] holds the custom architectural building block of the detection
//!   network: [`nn::SplitConv2d`], a channel-split convolution that blends a
//!   grouped k×k path and a pointwise 1×1 path through learned softmax gates.
//!   It is a [burn](https://burn.dev) module, composable into a larger
//!   trainable network.
//! - [`detect`], [`annotate`] and [`server`] form the application around a
//!   pretrained detector exported to ONNX: load it from a path, run it on an
//!   uploaded image, draw boxes and labels, and report summary statistics.

pub mod annotate;
pub mod detect;
pub mod nn;
pub mod server;

pub use detect::{BoundingBox, Detection, DetectionSummary, YoloDetector, YoloDetectorConfig};
pub use nn::{ChannelSplit, SplitConv2d, SplitConv2dConfig};
