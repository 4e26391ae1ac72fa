//! Encoder invocation construction.
//!
//! Pure mapping from (device selection, capture settings) to the argument
//! list of one ffmpeg invocation. No I/O happens here; the supervisor owns
//! spawning. Streaming output is tuned for glass-to-glass latency over
//! compression efficiency.

use std::path::Path;

use crate::config::CaptureConfig;
use crate::device::{CapturePlatform, DeviceSelection};
use crate::output::OutputArea;

/// Input-side arguments for the selected source.
///
/// Option flags precede `-f`/`-i` because ffmpeg applies them to the input
/// that follows them.
fn input_args(selection: &DeviceSelection, capture: &CaptureConfig) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match (selection.platform, selection.device.as_deref()) {
        (CapturePlatform::AvFoundation, Some(index)) => {
            args.extend([
                "-framerate".to_string(),
                capture.framerate.to_string(),
                "-y".to_string(),
                "-f".to_string(),
                "avfoundation".to_string(),
                "-i".to_string(),
                index.to_string(),
            ]);
        }
        (CapturePlatform::V4l2, Some(path)) => {
            args.extend([
                "-video_size".to_string(),
                capture.size(),
                "-framerate".to_string(),
                capture.framerate.to_string(),
                "-input_format".to_string(),
                "yuyv422".to_string(),
                "-y".to_string(),
                "-f".to_string(),
                "v4l2".to_string(),
                "-i".to_string(),
                path.to_string(),
            ]);
        }
        _ => {
            args.extend([
                "-y".to_string(),
                "-f".to_string(),
                "lavfi".to_string(),
                "-i".to_string(),
                format!("testsrc=size={}:rate={}", capture.size(), capture.framerate),
            ]);
        }
    }

    args
}

/// Build the argument list for a continuous segmented-HLS run.
pub fn stream_args(
    selection: &DeviceSelection,
    capture: &CaptureConfig,
    output: &OutputArea,
) -> Vec<String> {
    let mut args = input_args(selection, capture);

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-tune".to_string(),
        "zerolatency".to_string(),
        "-profile:v".to_string(),
        "baseline".to_string(),
        "-level".to_string(),
        "3.0".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        capture.segment_seconds.to_string(),
        "-hls_list_size".to_string(),
        capture.segment_list_size.to_string(),
        "-hls_flags".to_string(),
        "append_list+delete_segments".to_string(),
        "-start_number".to_string(),
        "1".to_string(),
        "-hls_segment_filename".to_string(),
        output.segment_template().to_string_lossy().to_string(),
        output.manifest_path().to_string_lossy().to_string(),
    ]);

    args
}

/// Build the argument list for one single-frame snapshot capture.
///
/// The frame number is burned into the image so consecutive captures are
/// distinguishable, and the output goes to a temporary path that the caller
/// publishes on success.
pub fn snapshot_args(
    selection: &DeviceSelection,
    capture: &CaptureConfig,
    temp: &Path,
    frame: u64,
) -> Vec<String> {
    let mut args = input_args(selection, capture);

    args.extend([
        "-vf".to_string(),
        format!(
            "drawtext=text='frame {}':x=10:y=10:fontsize=24:fontcolor=white:box=1:boxcolor=black@0.5",
            frame
        ),
        "-frames:v".to_string(),
        "1".to_string(),
        temp.to_string_lossy().to_string(),
    ]);

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn output() -> OutputArea {
        OutputArea::new(PathBuf::from("/var/lib/camserve/hls"))
    }

    #[test]
    fn fallback_stream_args_use_test_pattern() {
        let args = stream_args(
            &DeviceSelection::synthetic(),
            &CaptureConfig::default(),
            &output(),
        );

        assert_eq!(
            args,
            vec![
                "-y",
                "-f",
                "lavfi",
                "-i",
                "testsrc=size=640x480:rate=30",
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-level",
                "3.0",
                "-pix_fmt",
                "yuv420p",
                "-f",
                "hls",
                "-hls_time",
                "2",
                "-hls_list_size",
                "15",
                "-hls_flags",
                "append_list+delete_segments",
                "-start_number",
                "1",
                "-hls_segment_filename",
                "/var/lib/camserve/hls/segment_%d.ts",
                "/var/lib/camserve/hls/index.m3u8",
            ]
        );
    }

    #[test]
    fn v4l2_stream_args_configure_device_input() {
        let args = stream_args(
            &DeviceSelection::v4l2("/dev/video0"),
            &CaptureConfig::default(),
            &output(),
        );

        // Input option flags must precede the -f/-i pair they apply to.
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert!(args.iter().position(|a| a == "-video_size").unwrap() < f);
        assert!(args.iter().position(|a| a == "-input_format").unwrap() < f);
        assert_eq!(args[f + 1], "v4l2");
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/dev/video0");
    }

    #[test]
    fn avfoundation_stream_args_use_device_index() {
        let args = stream_args(
            &DeviceSelection::avfoundation("0"),
            &CaptureConfig::default(),
            &output(),
        );

        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "avfoundation");
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "0");
        assert!(!args.iter().any(|a| a == "-input_format"));
    }

    #[test]
    fn segment_template_is_uniquely_numbered() {
        let args = stream_args(
            &DeviceSelection::synthetic(),
            &CaptureConfig::default(),
            &output(),
        );
        let tpl = args
            .iter()
            .position(|a| a == "-hls_segment_filename")
            .unwrap();
        assert!(args[tpl + 1].contains("%d"));
        // Manifest path is the final positional argument.
        assert!(args.last().unwrap().ends_with("index.m3u8"));
    }

    #[test]
    fn stream_args_honor_custom_geometry() {
        let mut capture = CaptureConfig::default();
        capture.width = 1280;
        capture.height = 720;
        capture.framerate = 25;
        capture.segment_seconds = 4;
        capture.segment_list_size = 6;

        let args = stream_args(&DeviceSelection::synthetic(), &capture, &output());

        assert!(args.contains(&"testsrc=size=1280x720:rate=25".to_string()));
        let t = args.iter().position(|a| a == "-hls_time").unwrap();
        assert_eq!(args[t + 1], "4");
        let l = args.iter().position(|a| a == "-hls_list_size").unwrap();
        assert_eq!(args[l + 1], "6");
    }

    #[test]
    fn snapshot_args_overlay_frame_number_and_write_temp_path() {
        let temp = PathBuf::from("/var/lib/camserve/hls/latest_tmp.jpg");
        let args = snapshot_args(
            &DeviceSelection::synthetic(),
            &CaptureConfig::default(),
            &temp,
            7,
        );

        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf + 1].contains("frame 7"));
        let frames = args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(args[frames + 1], "1");
        assert_eq!(args.last().unwrap(), temp.to_str().unwrap());
    }
}
