use std::path::Path;

use crate::config::{EngineConfig, TranscodeParams};

/// Builder for ffmpeg argument lists. Pure: never executes anything.
pub struct CommandBuilder {
    audio_bitrate: String,
}

impl CommandBuilder {
    pub fn new(cfg: &EngineConfig) -> Self {
        CommandBuilder {
            audio_bitrate: cfg.audio_bitrate.clone(),
        }
    }

    /// Flags shared by every invocation: quiet output, overwrite the
    /// destination, regenerate timestamps and skip over minor stream
    /// corruption instead of aborting.
    fn push_common_head(&self, args: &mut Vec<String>, src: &Path) {
        args.push("-loglevel".to_string());
        args.push("warning".to_string());
        args.push("-hide_banner".to_string());
        args.push("-nostats".to_string());
        args.push("-y".to_string());
        args.push("-fflags".to_string());
        args.push("+genpts+discardcorrupt".to_string());
        args.push("-err_detect".to_string());
        args.push("ignore_err".to_string());
        args.push("-i".to_string());
        args.push(src.to_string_lossy().to_string());
    }

    /// Non-negative timestamps and front-loaded metadata for streaming
    /// playback, then the destination.
    fn push_common_tail(&self, args: &mut Vec<String>, dst: &Path) {
        args.push("-avoid_negative_ts".to_string());
        args.push("make_zero".to_string());
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
        args.push(dst.to_string_lossy().to_string());
    }

    /// MKV → MP4 container repackaging. Video is always stream-copied;
    /// audio is copied unless `transcode_audio`, in which case it is
    /// re-encoded to AAC with resampling to smooth timestamp gaps. Text
    /// subtitles are optionally recoded to mov_text.
    pub fn remux_mkv(
        &self,
        src: &Path,
        dst: &Path,
        transcode_audio: bool,
        keep_text_subs: bool,
    ) -> Vec<String> {
        let mut args = Vec::new();
        self.push_common_head(&mut args, src);

        args.push("-map".to_string());
        args.push("0:v?".to_string());
        args.push("-map".to_string());
        args.push("0:a?".to_string());
        args.push("-c:v".to_string());
        args.push("copy".to_string());

        if transcode_audio {
            args.push("-c:a".to_string());
            args.push("aac".to_string());
            args.push("-b:a".to_string());
            args.push(self.audio_bitrate.clone());
            args.push("-af".to_string());
            args.push("aresample=async=1:first_pts=0".to_string());
        } else {
            args.push("-c:a".to_string());
            args.push("copy".to_string());
        }

        if keep_text_subs {
            args.push("-map".to_string());
            args.push("0:s?".to_string());
            args.push("-c:s".to_string());
            args.push("mov_text".to_string());
        }

        self.push_common_tail(&mut args, dst);
        args
    }

    /// WEBM/OGV → MP4 full re-encode: first video and first audio stream
    /// only, x264 video at the requested quality (or true lossless),
    /// baseline-compatible 4:2:0 pixel layout, AAC audio.
    pub fn transcode(&self, src: &Path, dst: &Path, params: &TranscodeParams) -> Vec<String> {
        let mut args = Vec::new();
        self.push_common_head(&mut args, src);

        args.push("-map".to_string());
        args.push("0:v:0?".to_string());
        args.push("-map".to_string());
        args.push("0:a:0?".to_string());
        args.push("-c:v".to_string());
        args.push("libx264".to_string());

        if params.lossless {
            args.push("-preset".to_string());
            args.push(if params.preset.is_empty() {
                "veryslow".to_string()
            } else {
                params.preset.clone()
            });
            args.push("-crf".to_string());
            args.push("0".to_string());
        } else {
            args.push("-preset".to_string());
            args.push(params.preset.clone());
            args.push("-crf".to_string());
            args.push(params.crf.to_string());
        }
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());

        if let Some(tune) = params.tune.as_deref() {
            args.push("-tune".to_string());
            args.push(tune.to_string());
        }

        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-b:a".to_string());
        args.push(self.audio_bitrate.clone());

        self.push_common_tail(&mut args, dst);
        args
    }
}
