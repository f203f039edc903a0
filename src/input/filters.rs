//! Audio filters, rendered into an `ffmpeg` filter graph.

use std::{fmt::Write, time::Duration};

use crate::constants::SAMPLE_RATE_RAW;

const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// A single named audio filter.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Filter {
    /// Boosts low frequencies by the given gain, in dB.
    BassBoost(f64),
    /// Raises pitch and tempo together by 25%.
    Nightcore,
    /// Lowers pitch and tempo together by 20%.
    Vaporwave,
    /// Changes tempo by the given factor, keeping pitch.
    Speed(f64),
    /// Changes pitch by the given factor, keeping tempo.
    Pitch(f64),
    /// Pans audio slowly around the listener.
    EightD,
    /// Suppresses centre-panned vocals.
    Karaoke,
    /// A raw `ffmpeg` filter graph fragment, and the factor by which it speeds up playback.
    Custom {
        /// Filter graph fragment.
        graph: String,
        /// Playback speed multiplier.
        speed: f64,
    },
}

impl Filter {
    /// Default gain used by the `bass_boost` preset.
    pub const DEFAULT_BASS_GAIN: f64 = 10.0;

    /// Looks a preset up by name, parsing an optional numeric argument.
    ///
    /// `speed` and `pitch` require an argument, `bass_boost` defaults to
    /// [`DEFAULT_BASS_GAIN`].
    ///
    /// [`DEFAULT_BASS_GAIN`]: Filter::DEFAULT_BASS_GAIN
    #[must_use]
    pub fn from_name(name: &str, arg: Option<f64>) -> Option<Self> {
        let positive = arg.filter(|v| v.is_finite() && *v > 0.0);

        Some(match name {
            "bass_boost" | "bassboost" => Self::BassBoost(arg.unwrap_or(Self::DEFAULT_BASS_GAIN)),
            "nightcore" => Self::Nightcore,
            "vaporwave" => Self::Vaporwave,
            "speed" => Self::Speed(positive?),
            "pitch" => Self::Pitch(positive?),
            "8d" | "eight_d" => Self::EightD,
            "karaoke" => Self::Karaoke,
            _ => return None,
        })
    }

    /// The `ffmpeg` filter graph fragment for this filter.
    #[must_use]
    pub fn graph(&self) -> String {
        match self {
            Self::BassBoost(gain) => format!("bass=g={gain}"),
            Self::Nightcore => resample(1.25),
            Self::Vaporwave => resample(0.8),
            Self::Speed(factor) => atempo_chain(*factor),
            Self::Pitch(factor) => format!("{},{}", resample(*factor), atempo_chain(1.0 / factor)),
            Self::EightD => "apulsator=hz=0.08".into(),
            Self::Karaoke => "stereotools=mlev=0.03".into(),
            Self::Custom { graph, .. } => graph.clone(),
        }
    }

    /// Factor by which this filter speeds up playback.
    #[must_use]
    pub fn speed(&self) -> f64 {
        match self {
            Self::Nightcore => 1.25,
            Self::Vaporwave => 0.8,
            Self::Speed(factor) => *factor,
            Self::Custom { speed, .. } => *speed,
            _ => 1.0,
        }
    }
}

/// Changes pitch and tempo together, then returns to the output sample rate.
fn resample(factor: f64) -> String {
    format!("asetrate={SAMPLE_RATE_RAW}*{factor},aresample={SAMPLE_RATE_RAW}")
}

/// `atempo` only accepts factors within `[0.5, 2.0]`: larger changes are chained.
fn atempo_chain(mut factor: f64) -> String {
    let mut out = String::new();

    while factor > ATEMPO_MAX {
        out.push_str("atempo=2.0,");
        factor /= ATEMPO_MAX;
    }
    while factor < ATEMPO_MIN {
        out.push_str("atempo=0.5,");
        factor /= ATEMPO_MIN;
    }

    _ = write!(out, "atempo={factor}");
    out
}

/// The ordered set of filters active on a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter.
    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    /// Adds `filter`, or removes it if an equal filter is already active.
    ///
    /// Returns whether the filter is now active.
    pub fn toggle(&mut self, filter: Filter) -> bool {
        if let Some(idx) = self.filters.iter().position(|f| *f == filter) {
            self.filters.remove(idx);
            false
        } else {
            self.filters.push(filter);
            true
        }
    }

    /// Removes every filter.
    pub fn clear(&mut self) {
        self.filters.clear();
    }

    /// Returns whether no filters are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Active filters, in application order.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Combined playback speed multiplier of every filter.
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.filters.iter().map(Filter::speed).product()
    }

    /// Renders the full filter graph, preceded by a fade-in if one is given.
    ///
    /// Returns `None` if there is nothing to apply.
    #[must_use]
    pub fn graph(&self, fade_in: Option<Duration>) -> Option<String> {
        let mut parts: Vec<String> = vec![];

        if let Some(fade) = fade_in.filter(|d| !d.is_zero()) {
            parts.push(format!("afade=t=in:ss=0:d={}", fade.as_secs_f64()));
        }
        parts.extend(self.filters.iter().map(Filter::graph));

        (!parts.is_empty()).then(|| parts.join(","))
    }
}

impl From<Vec<Filter>> for FilterChain {
    fn from(filters: Vec<Filter>) -> Self {
        Self { filters }
    }
}

impl FromIterator<Filter> for FilterChain {
    fn from_iter<T: IntoIterator<Item = Filter>>(iter: T) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}
