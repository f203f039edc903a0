use super::{ChildContainer, FilterChain, Frame, TranscodeError, TranscodeResult};
use crate::{constants::*, Config};
use audiopus::{coder::Encoder as OpusEncoder, Application as CodingMode, Bitrate, Channels};
use byteorder::{ByteOrder, LittleEndian};
use flume::{Receiver, Sender};
use std::{
    ffi::OsString,
    fmt,
    io::{Error as IoError, ErrorKind, Read},
    path::PathBuf,
    process::{Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, instrument, trace, warn};

/// A resolved audio source which the transcoder can open.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Playable {
    /// A remote stream, fetched over HTTP(S).
    Url(String),
    /// A local file.
    File(PathBuf),
}

impl Playable {
    fn is_remote(&self) -> bool {
        matches!(self, Self::Url(_))
    }

    fn as_arg(&self) -> OsString {
        match self {
            Self::Url(url) => url.into(),
            Self::File(path) => path.clone().into_os_string(),
        }
    }
}

impl fmt::Display for Playable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Settings for a single transcoded stream.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct StreamOptions {
    /// Offset into the track at which to start.
    pub seek: Duration,
    /// Filters applied to the track's audio.
    pub filters: FilterChain,
    /// Length of the fade-in applied when starting from the beginning of a track.
    pub fade_in: Duration,
    /// Opus encoder bitrate.
    pub bitrate: Bitrate,
    /// Number of encoded frames buffered ahead of playback.
    pub buffer_len: usize,
    /// Transcoder executable.
    pub path: OsString,
}

impl StreamOptions {
    /// Stream settings taken from a session's configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            seek: Duration::ZERO,
            filters: FilterChain::default(),
            fade_in: config.fade_in,
            bitrate: config.bitrate,
            buffer_len: config.frame_buffer_len,
            path: config.transcoder_path.clone(),
        }
    }

    /// Sets the offset into the track at which to start.
    #[must_use]
    pub fn seek(mut self, seek: Duration) -> Self {
        self.seek = seek;
        self
    }

    /// Sets the filters applied to the track's audio.
    #[must_use]
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    fn fade(&self) -> Option<Duration> {
        self.seek.is_zero().then_some(self.fade_in)
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Builds the argument list which decodes `source` into 48kHz stereo `s16le` PCM on stdout.
pub(crate) fn ffmpeg_args(source: &Playable, opts: &StreamOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![];
    let mut push = |arg: &str| args.push(arg.into());

    if source.is_remote() {
        for arg in [
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
        ] {
            push(arg);
        }
    }

    if !opts.seek.is_zero() {
        push("-ss");
        push(&opts.seek.as_secs_f64().to_string());
    }

    args.push("-i".into());
    args.push(source.as_arg());

    if let Some(graph) = opts.filters.graph(opts.fade()) {
        args.push("-af".into());
        args.push(graph.into());
    }

    let sample_rate = SAMPLE_RATE_RAW.to_string();
    args.extend(
        [
            "-analyzeduration",
            "0",
            "-loglevel",
            "0",
            "-vn",
            "-f",
            "s16le",
            "-ar",
            &sample_rate,
            "-ac",
            "2",
            "pipe:1",
        ]
        .into_iter()
        .map(OsString::from),
    );

    args
}

/// A pull-based source of Opus frames, fed by one external transcoder process.
///
/// Decoding and encoding happen on a dedicated thread which stays at most
/// [`StreamOptions::buffer_len`] frames ahead of playback. Dropping the
/// `Transcoder` kills the process and stops that thread.
pub struct Transcoder {
    rx: Receiver<Frame>,
    ready: Receiver<TranscodeResult<()>>,
    failed: Receiver<TranscodeError>,
    started: Arc<AtomicBool>,
    child: Option<ChildContainer>,
    seek: Duration,
    speed: f64,
    frames_read: u64,
}

impl Transcoder {
    /// Starts transcoding `source`.
    #[instrument(skip(opts))]
    pub fn spawn(source: &Playable, opts: &StreamOptions) -> TranscodeResult<Self> {
        let args = ffmpeg_args(source, opts);
        debug!("Spawning transcoder with {:?}.", args);

        let child = Command::new(&opts.path)
            .args(&args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        let mut child = ChildContainer::new(child);
        let stdout = child.take_stdout().ok_or_else(|| {
            TranscodeError::Spawn(IoError::new(ErrorKind::BrokenPipe, "transcoder has no stdout"))
        })?;

        let mut out = Self::from_pcm(stdout, opts);
        out.child = Some(child);

        Ok(out)
    }

    /// Encodes raw 48kHz stereo `s16le` PCM read from `reader`.
    pub fn from_pcm<R: Read + Send + 'static>(reader: R, opts: &StreamOptions) -> Self {
        let (tx, rx) = flume::bounded(opts.buffer_len.max(1));
        let (ready_tx, ready) = flume::bounded(1);
        let (failed_tx, failed) = flume::bounded(1);
        let started = Arc::new(AtomicBool::new(false));

        let bitrate = opts.bitrate;
        let thread_started = started.clone();
        std::thread::spawn(move || {
            trace!("Encoder thread started.");
            encode_stream(reader, bitrate, &tx, &ready_tx, &failed_tx, &thread_started);
            trace!("Encoder thread finished.");
        });

        Self {
            rx,
            ready,
            failed,
            started,
            child: None,
            seek: opts.seek,
            speed: opts.filters.speed(),
            frames_read: 0,
        }
    }

    /// Takes the next buffered frame, if one is ready. Never blocks.
    pub fn read(&mut self) -> Option<Frame> {
        let frame = self.rx.try_recv().ok()?;
        if !frame.padding {
            self.frames_read += 1;
        }
        Some(frame)
    }

    /// Returns whether the stream has produced audio and is not yet exhausted.
    #[must_use]
    pub fn readable(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.is_finished()
    }

    /// Returns whether every frame has been produced and read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.rx.is_disconnected() && self.rx.is_empty()
    }

    /// Resolves once with `Ok` when the first frame is buffered, or with the
    /// reason no frame will ever arrive.
    #[must_use]
    pub fn ready_signal(&self) -> Receiver<TranscodeResult<()>> {
        self.ready.clone()
    }

    /// Number of audio frames read so far.
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Position in the track, counted from frames read rather than wall-clock time.
    #[must_use]
    pub fn position(&self) -> Duration {
        let played = self.frames_read as f64 * self.speed * TIMESTEP_LENGTH.as_nanos() as f64;
        self.seek + Duration::from_nanos(played.round() as u64)
    }

    /// Exit status of the transcoder process, if it has exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.as_mut().and_then(ChildContainer::try_wait)
    }

    /// Why the stream stopped, if it did not run to a clean end.
    ///
    /// Checked once [`is_finished`] holds: a failed read or encode, or else an
    /// unsuccessful exit of the transcoder process.
    ///
    /// [`is_finished`]: Transcoder::is_finished
    pub fn take_error(&mut self) -> Option<TranscodeError> {
        if let Ok(e) = self.failed.try_recv() {
            return Some(e);
        }

        match self.exit_status() {
            Some(status) if !status.success() => Some(TranscodeError::Exited(status)),
            _ => None,
        }
    }

    /// Upgrades a missing-audio failure into an exit failure when the process
    /// is known to have crashed.
    pub fn explain(&mut self, error: TranscodeError) -> TranscodeError {
        match (error, self.exit_status()) {
            (TranscodeError::NoAudio, Some(status)) if !status.success() =>
                TranscodeError::Exited(status),
            (error, _) => error,
        }
    }
}

impl fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcoder")
            .field("buffered", &self.rx.len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("child", &self.child)
            .field("seek", &self.seek)
            .field("speed", &self.speed)
            .field("frames_read", &self.frames_read)
            .finish()
    }
}

fn new_encoder(bitrate: Bitrate) -> TranscodeResult<OpusEncoder> {
    let mut encoder = OpusEncoder::new(SAMPLE_RATE, Channels::Stereo, CodingMode::Audio)?;
    encoder.set_bitrate(bitrate)?;

    Ok(encoder)
}

fn encode_stream<R: Read>(
    mut source: R,
    bitrate: Bitrate,
    tx: &Sender<Frame>,
    ready: &Sender<TranscodeResult<()>>,
    failed: &Sender<TranscodeError>,
    started: &AtomicBool,
) {
    let fail = |e: TranscodeError| {
        if started.load(Ordering::Acquire) {
            warn!("Transcoding stopped early: {}.", e);
            _ = failed.send(e);
        } else {
            _ = ready.send(Err(e));
        }
    };

    let encoder = match new_encoder(bitrate) {
        Ok(e) => e,
        Err(e) => return fail(e),
    };

    let mut pcm = [0u8; STEREO_FRAME_BYTE_SIZE];
    let mut samples = [0i16; STEREO_FRAME_SIZE];
    let mut opus = [0u8; OPUS_FRAME_MAX];

    loop {
        let len = match read_frame(&mut source, &mut pcm) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) => return fail(e.into()),
        };

        // A short final read is padded out with silence.
        pcm[len..].fill(0);
        LittleEndian::read_i16_into(&pcm, &mut samples);

        let size = match encoder.encode(&samples, &mut opus) {
            Ok(size) => size,
            Err(e) => return fail(e.into()),
        };

        if tx.send(Frame::new(opus[..size].to_vec())).is_err() {
            trace!("Stream dropped, halting encoder.");
            return;
        }

        if !started.swap(true, Ordering::AcqRel) {
            _ = ready.send(Ok(()));
        }
    }

    if !started.load(Ordering::Acquire) {
        _ = ready.send(Err(TranscodeError::NoAudio));
    }
}

/// Fills `buf` unless the source ends first, returning the number of bytes read.
fn read_frame<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Filter;
    use std::io::Cursor;

    fn pcm(frames: f64) -> Cursor<Vec<u8>> {
        let len = (STEREO_FRAME_BYTE_SIZE as f64 * frames) as usize;
        let bytes = (0..len).map(|i| (i % 251) as u8).collect();
        Cursor::new(bytes)
    }

    fn drain(t: &mut Transcoder) -> Vec<Frame> {
        let mut out = vec![];
        loop {
            if let Some(frame) = t.read() {
                out.push(frame);
            } else if t.is_finished() {
                return out;
            } else {
                std::thread::yield_now();
            }
        }
    }

    fn args(source: &Playable, opts: &StreamOptions) -> Vec<String> {
        ffmpeg_args(source, opts)
            .into_iter()
            .map(|s| s.into_string().unwrap())
            .collect()
    }

    #[test]
    fn remote_sources_reconnect_and_fade_in() {
        let opts = StreamOptions::default().filters(vec![Filter::Karaoke].into());
        let args = args(&Playable::Url("https://example.com/a.webm".into()), &opts);

        assert_eq!(args[..2], ["-reconnect", "1"]);
        assert!(!args.contains(&"-ss".to_string()));

        let af = args.iter().position(|a| a == "-af").unwrap();
        assert_eq!(args[af + 1], "afade=t=in:ss=0:d=1.5,stereotools=mlev=0.03");
        assert_eq!(args[args.len() - 7..], ["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]);
    }

    #[test]
    fn seeking_skips_fade() {
        let opts = StreamOptions::default().seek(Duration::from_secs(30));
        let args = args(&Playable::File("/music/a.flac".into()), &opts);

        assert_eq!(args[..4], ["-ss", "30", "-i", "/music/a.flac"]);
        assert!(!args.contains(&"-af".to_string()));
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn pcm_is_framed_and_padded() {
        let mut t = Transcoder::from_pcm(pcm(3.5), &StreamOptions::default());

        assert!(t.ready_signal().recv().unwrap().is_ok());
        assert!(t.readable() || t.is_finished());

        let frames = drain(&mut t);
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| !f.padding && !f.opus.is_empty()));

        assert_eq!(t.frames_read(), 4);
        assert_eq!(t.position(), Duration::from_millis(80));
        assert!(!t.readable());
        assert!(t.take_error().is_none());
    }

    /// Yields its audio, then fails as a crashed process's pipe would.
    struct Truncated(Cursor<Vec<u8>>);

    impl Read for Truncated {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(IoError::new(ErrorKind::BrokenPipe, "transcoder died")),
                n => Ok(n),
            }
        }
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn failures_after_first_frame_are_kept_for_the_reader() {
        let mut t = Transcoder::from_pcm(Truncated(pcm(2.0)), &StreamOptions::default());

        assert!(t.ready_signal().recv().unwrap().is_ok());
        assert_eq!(drain(&mut t).len(), 2);
        assert!(matches!(t.take_error(), Some(TranscodeError::Io(_))));
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn position_scales_with_speed_and_seek() {
        let opts = StreamOptions::default()
            .seek(Duration::from_secs(2))
            .filters(vec![Filter::Speed(2.0)].into());
        let mut t = Transcoder::from_pcm(pcm(4.0), &opts);

        drain(&mut t);
        assert_eq!(t.position(), Duration::from_millis(2160));
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn empty_sources_report_no_audio() {
        let t = Transcoder::from_pcm(pcm(0.0), &StreamOptions::default());

        assert!(matches!(
            t.ready_signal().recv().unwrap(),
            Err(TranscodeError::NoAudio)
        ));
        assert!(!t.readable());
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn buffer_is_bounded() {
        let opts = StreamOptions {
            buffer_len: 3,
            ..Default::default()
        };
        let t = Transcoder::from_pcm(pcm(20.0), &opts);

        t.ready_signal().recv().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(t.rx.len() <= 3);
    }

    #[test]
    fn missing_transcoder_fails_to_spawn() {
        let opts = StreamOptions {
            path: "/nonexistent/warbler-transcoder".into(),
            ..Default::default()
        };

        assert!(matches!(
            Transcoder::spawn(&Playable::File("a.flac".into()), &opts),
            Err(TranscodeError::Spawn(_))
        ));
    }
}
