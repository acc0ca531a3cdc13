//! Media encoding for multimodal requests
//!
//! Turns decoded images and video inputs into transport-safe strings (data
//! URIs or remote URLs) that can be embedded in a chat message.

pub mod image;
pub mod video;

pub use self::image::{encode_image_blocking, encode_image_data_uri, ImageTensor, Layout, PixelData};
pub use video::{encode_video, EncodedVideo, VideoInput, MAX_VIDEO_BYTES};
