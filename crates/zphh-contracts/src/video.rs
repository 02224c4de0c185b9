use std::fmt;

use tracing::warn;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VideoStyle {
    #[default]
    None,
    Cartoon3d,
    BlackWhitePhoto,
    OilPainting,
    Cinematic,
}

impl VideoStyle {
    pub const ALL: &'static [Self] = &[
        Self::Cartoon3d,
        Self::BlackWhitePhoto,
        Self::OilPainting,
        Self::Cinematic,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Cartoon3d => "卡通3D",
            Self::BlackWhitePhoto => "黑白老照片",
            Self::OilPainting => "油画",
            Self::Cinematic => "电影感",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|style| style.label().eq_ignore_ascii_case(trimmed))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VideoMood {
    #[default]
    None,
    Warm,
    Lively,
    Tense,
    Lonely,
}

impl VideoMood {
    pub const ALL: &'static [Self] = &[Self::Warm, Self::Lively, Self::Tense, Self::Lonely];

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Warm => "温馨和谐",
            Self::Lively => "生动活泼",
            Self::Tense => "紧张刺激",
            Self::Lonely => "凄凉寂寞",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL.iter().copied().find(|mood| mood.label() == trimmed)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraMotion {
    #[default]
    None,
    Horizontal,
    Vertical,
    PushIn,
    PullOut,
}

impl CameraMotion {
    pub const ALL: &'static [Self] = &[
        Self::Horizontal,
        Self::Vertical,
        Self::PushIn,
        Self::PullOut,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Horizontal => "水平",
            Self::Vertical => "垂直",
            Self::PushIn => "推近",
            Self::PullOut => "拉远",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|motion| motion.label() == trimmed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const KNOWN: &'static [(u32, u32)] = &[(16, 9), (9, 16), (1, 1), (4, 3), (3, 4)];

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Accepts `w:h`, also written with a full-width colon, `/`, `x` or `×`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (width, height) = raw
            .trim()
            .split_once(|c: char| matches!(c, ':' | '：' | '/' | 'x' | 'X' | '×'))?;
        let width = width.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
        let height = height.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
        Some(Self { width, height })
    }

    pub fn is_known(self) -> bool {
        Self::KNOWN.contains(&(self.width, self.height))
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::new(16, 9)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoParameters {
    pub prompt: String,
    pub style: VideoStyle,
    pub mood: VideoMood,
    pub camera: CameraMotion,
    pub ratio: AspectRatio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Segment {
    Style(VideoStyle),
    Mood(VideoMood),
    Camera(CameraMotion),
    Ratio(AspectRatio),
}

fn classify_segment(raw: &str) -> Option<Segment> {
    if let Some(style) = VideoStyle::from_label(raw) {
        return Some(Segment::Style(style));
    }
    if let Some(mood) = VideoMood::from_label(raw) {
        return Some(Segment::Mood(mood));
    }
    if let Some(camera) = CameraMotion::from_label(raw) {
        return Some(Segment::Camera(camera));
    }
    AspectRatio::parse(raw).map(Segment::Ratio)
}

fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warn!("{message}");
    warnings.push(message);
}

/// Parses `<prompt>-<style>-<mood>-<camera>-<ratio>`.
///
/// Parameters after the prompt are recognized by value, so any of them may
/// be omitted. Dashes inside the prompt are kept: the prompt extends up to
/// the first recognized parameter. Unknown trailing segments are dropped
/// with a warning; a well-formed but unusual ratio is accepted with a
/// warning.
pub fn parse_video_parameters(raw: &str, warnings: &mut Vec<String>) -> VideoParameters {
    let segments: Vec<&str> = raw.split('-').collect();
    let first_param = segments
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, segment)| classify_segment(segment).is_some())
        .map(|(idx, _)| idx)
        .unwrap_or(segments.len());

    let mut params = VideoParameters {
        prompt: segments[..first_param].join("-").trim().to_string(),
        ..VideoParameters::default()
    };

    for segment in &segments[first_param..] {
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            continue;
        }
        match classify_segment(trimmed) {
            Some(Segment::Style(style)) => params.style = style,
            Some(Segment::Mood(mood)) => params.mood = mood,
            Some(Segment::Camera(camera)) => params.camera = camera,
            Some(Segment::Ratio(ratio)) => {
                if !ratio.is_known() {
                    push_unique_warning(
                        warnings,
                        format!("unrecognized aspect ratio '{ratio}'; passing it through as-is"),
                    );
                }
                params.ratio = ratio;
            }
            None => push_unique_warning(
                warnings,
                format!("ignoring unrecognized video parameter '{trimmed}'"),
            ),
        }
    }
    params
}
