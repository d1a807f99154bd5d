// SPDX-License-Identifier: GPL-3.0-only

//! Photo pipeline: lossless encoding and simple frame statistics

pub mod analysis;
pub mod encoding;

pub use analysis::average_luminance;
pub use encoding::{EncodedFrame, encode_png};
