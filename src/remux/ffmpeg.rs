use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use tracing::error;

use crate::remux::RemuxEngine;
use crate::supervisor::types::RET_NATIVE_FAULT;

extern "C" {
    fn remux_m3u8_to_mp4(input: *const c_char, output: *const c_char) -> c_int;
}

/// Engine backed by the native `ffmpeg-remux` library.
pub struct FfmpegRemux;

impl FfmpegRemux {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfmpegRemux {
    fn default() -> Self {
        Self::new()
    }
}

impl RemuxEngine for FfmpegRemux {
    fn remux(&self, input: &Path, output: &Path) -> i32 {
        let input_c = match CString::new(input.to_string_lossy().as_bytes()) {
            Ok(s) => s,
            Err(e) => {
                error!("input path is not a valid C string: {}", e);
                return RET_NATIVE_FAULT;
            }
        };
        let output_c = match CString::new(output.to_string_lossy().as_bytes()) {
            Ok(s) => s,
            Err(e) => {
                error!("output path is not a valid C string: {}", e);
                return RET_NATIVE_FAULT;
            }
        };

        unsafe { remux_m3u8_to_mp4(input_c.as_ptr(), output_c.as_ptr()) }
    }
}
